//! Live connection accounting.

use std::sync::atomic::{AtomicU64, Ordering};

use super::ConnectionKind;

static LIVE_CONNECTIONS: AtomicU64 = AtomicU64::new(0);

/// Guard counting one connection from construction until disposal.
pub(super) struct LiveConnection {
    kind: ConnectionKind,
}

impl LiveConnection {
    pub(super) fn new(kind: ConnectionKind) -> Self {
        LIVE_CONNECTIONS.fetch_add(1, Ordering::Relaxed);
        crate::metrics::inc_connections(kind);
        Self { kind }
    }
}

impl Drop for LiveConnection {
    fn drop(&mut self) {
        LIVE_CONNECTIONS.fetch_sub(1, Ordering::Relaxed);
        crate::metrics::dec_connections(self.kind);
    }
}

/// Number of connections constructed and not yet disposed in this process.
#[must_use]
pub fn live_connection_count() -> u64 { LIVE_CONNECTIONS.load(Ordering::Relaxed) }
