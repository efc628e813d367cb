//! Canonical error and result types for the crate.

use std::io;

use thiserror::Error;

use crate::connection::ConnectionState;

/// Errors surfaced by connection lifecycle and I/O operations.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// A lifecycle operation was invoked in a state that does not permit it.
    #[error("cannot {operation} a connection in state {state:?}")]
    InvalidState {
        /// Operation that was rejected.
        operation: &'static str,
        /// State the connection was in.
        state: ConnectionState,
    },
    /// A client was already bound to the connection.
    #[error("a client is already bound to this connection")]
    ClientAlreadyBound,
    /// The connection no longer accepts writes.
    #[error("connection is closed")]
    Closed,
    /// The caller's cancellation token fired before the operation finished.
    #[error("operation cancelled")]
    Cancelled,
    /// The connection filter rejected or failed the handshake.
    #[error("connection filter failed: {0}")]
    Filter(#[source] io::Error),
    /// The reactor reported an I/O failure.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

impl ConnectionError {
    pub(crate) fn invalid_state(operation: &'static str, state: ConnectionState) -> Self {
        Self::InvalidState { operation, state }
    }
}

/// Result type returned by connection operations.
pub type Result<T, E = ConnectionError> = std::result::Result<T, E>;
