//! Utilities for exercising `brokerframe` connections and servers in tests.
//!
//! Connections can be driven in memory through
//! [`MemoryReactor`](brokerframe::reactor::MemoryReactor) or over real
//! sockets with a [`BrokerServer`](brokerframe::BrokerServer) spawned on an
//! ephemeral port.
//!
//! ```rust,no_run
//! use brokerframe::{BrokerServer, Client, ConnectionConfig};
//! use brokerframe_testing::{TestResult, echo_client, round_trip, spawn_server};
//!
//! # async fn example() -> TestResult {
//! let server = spawn_server(BrokerServer::new(ConnectionConfig::default(), echo_client)).await?;
//! assert_eq!(round_trip(server.addr(), b"ping").await?, b"ping");
//! server.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod integration_helpers;
pub mod logging;
pub mod macros;
pub mod memory;
pub mod recorder;

pub use integration_helpers::{
    EchoClient,
    ServerHandle,
    echo_client,
    round_trip,
    spawn_server,
    unused_listener,
};
pub use logging::{LoggerHandle, logger};
pub use memory::{start_memory_connection, wait_for};
pub use recorder::{MetricsCapture, Sample, counter, gauge};

/// Result type for fallible tests.
pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;
