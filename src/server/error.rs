//! Errors raised by [`BrokerServer`](super::BrokerServer) operations.

use std::io;

use thiserror::Error;

/// Errors that may occur while binding or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or configuring the listening socket failed.
    #[error("bind error: {0}")]
    Bind(#[source] io::Error),
    /// The server was run before a listener was bound.
    #[error("server is not bound to a listener")]
    NotBound,
}
