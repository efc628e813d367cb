//! Metric helpers for `brokerframe`.
//!
//! This module defines metric names and thin wrappers around the
//! [`metrics`](https://docs.rs/metrics) crate. With the `metrics` feature
//! disabled every helper compiles to nothing.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

use crate::{connection::ConnectionKind, processing::ProcessingType};

/// Name of the gauge tracking live connections.
pub const CONNECTIONS_ACTIVE: &str = "brokerframe_connections_active";
/// Name of the counter tracking segments run through a pipeline.
pub const SEGMENTS_PROCESSED: &str = "brokerframe_segments_processed_total";
/// Name of the counter tracking encoded packets written to a socket.
pub const PACKETS_SENT: &str = "brokerframe_packets_sent_total";
/// Name of the counter tracking panicking processors.
pub const PIPELINE_ERRORS: &str = "brokerframe_pipeline_errors_total";
/// Name of the counter tracking transport and filter failures.
pub const ERRORS_TOTAL: &str = "brokerframe_errors_total";

fn kind_label(kind: ConnectionKind) -> &'static str {
    match kind {
        ConnectionKind::Client => "client",
        ConnectionKind::Mesh => "mesh",
    }
}

/// Increment the live connections gauge.
#[cfg(feature = "metrics")]
pub fn inc_connections(kind: ConnectionKind) {
    gauge!(CONNECTIONS_ACTIVE, "kind" => kind_label(kind)).increment(1.0);
}

/// Decrement the live connections gauge.
#[cfg(feature = "metrics")]
pub fn dec_connections(kind: ConnectionKind) {
    gauge!(CONNECTIONS_ACTIVE, "kind" => kind_label(kind)).decrement(1.0);
}

/// Record a segment entering the pipeline for `direction`.
#[cfg(feature = "metrics")]
pub fn inc_segments(direction: ProcessingType) {
    counter!(SEGMENTS_PROCESSED, "direction" => direction.as_str()).increment(1);
}

/// Record an encoded packet handed to the socket.
#[cfg(feature = "metrics")]
pub fn inc_packets_sent() { counter!(PACKETS_SENT).increment(1); }

/// Record a processor panic.
#[cfg(feature = "metrics")]
pub fn inc_pipeline_errors() { counter!(PIPELINE_ERRORS).increment(1); }

/// Record a transport or filter failure.
#[cfg(feature = "metrics")]
pub fn inc_errors() { counter!(ERRORS_TOTAL).increment(1); }

#[cfg(not(feature = "metrics"))]
pub fn inc_connections(kind: ConnectionKind) { let _ = kind_label(kind); }

#[cfg(not(feature = "metrics"))]
pub fn dec_connections(kind: ConnectionKind) { let _ = kind_label(kind); }

#[cfg(not(feature = "metrics"))]
pub fn inc_segments(direction: ProcessingType) { let _ = direction.as_str(); }

#[cfg(not(feature = "metrics"))]
pub fn inc_packets_sent() {}

#[cfg(not(feature = "metrics"))]
pub fn inc_pipeline_errors() {}

#[cfg(not(feature = "metrics"))]
pub fn inc_errors() {}
