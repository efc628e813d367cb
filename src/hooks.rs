//! Client callbacks invoked by a connection.
//!
//! The protocol layer implements [`Client`] to install its processors and to
//! learn when a connection opens and goes away.

use std::sync::Arc;

use crate::connection::Connection;

/// Protocol-level owner of a connection.
///
/// All methods have empty defaults.
pub trait Client: Send + Sync + 'static {
    /// Called once when the client is bound, before the connection starts.
    /// Protocol modules install their decode and encode processors here.
    fn on_bind(&self, _connection: &Arc<Connection>) {}

    /// Called when the connection enters
    /// [`ConnectionState::Open`](crate::connection::ConnectionState::Open).
    fn on_open(&self, _connection: &Arc<Connection>) {}

    /// Called exactly once when the connection is disposed.
    fn on_disconnect(&self, _connection: &Connection) {}
}

/// A client that ignores every callback.
impl Client for () {}
