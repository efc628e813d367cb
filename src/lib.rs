#![doc(html_root_url = "https://docs.rs/brokerframe/latest")]
//! Public API for the `brokerframe` library.
//!
//! This crate provides the connection layer of a message broker: identity,
//! lifecycle, pluggable decode and encode pipelines over pooled buffers,
//! liveness sweeping and a tokio TCP front end.

pub mod buffer;
pub mod config;
pub mod connection;
pub mod error;
pub mod factory;
pub mod filter;
pub mod hooks;
pub mod id;
pub mod manager;
pub mod metrics;
pub mod panic;
pub mod processing;
pub mod reactor;
pub mod server;
#[cfg(test)]
mod test_support;

pub use buffer::{BufferProvider, PooledBufferProvider, Segment};
pub use config::{BufferPolicy, ConnectionConfig};
pub use connection::{CloseReason, Connection, ConnectionKind, ConnectionState};
pub use error::{ConnectionError, Result};
pub use factory::ConnectionFactory;
pub use filter::{ConnectionFilter, FilteredStream, RawStream};
pub use hooks::Client;
pub use id::{ConnectionId, IdGenerator};
pub use manager::ConnectionManager;
pub use processing::{
    ProcessingContext,
    ProcessingSettings,
    ProcessingState,
    ProcessingType,
    Processor,
};
pub use server::{BrokerServer, ServerError};
