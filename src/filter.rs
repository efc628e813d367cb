//! Pluggable transport filters such as TLS.
//!
//! A [`ConnectionFilter`] runs once per connection, after reading has begun
//! and before the connection opens. It consumes the raw byte stream and hands
//! back the streams the connection should use from then on.

use std::{fmt, io, net::SocketAddr, sync::Arc};

use async_trait::async_trait;

use crate::{connection::SocketInput, reactor::SocketOutput};

/// Raw socket streams offered to a filter.
pub struct RawStream {
    /// Bytes as received from the reactor.
    pub input: Arc<SocketInput>,
    /// Writer straight to the reactor.
    pub output: Arc<dyn SocketOutput>,
    /// Address of the remote peer.
    pub peer: Option<SocketAddr>,
}

impl fmt::Debug for RawStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawStream")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

/// Per-connection resources kept alive by a filter.
///
/// Disposed when the socket closes.
pub trait FilterAdapter: Send {
    /// Release the adapter's resources.
    fn dispose(self: Box<Self>);
}

/// Streams a connection uses once its filter has finished.
pub struct FilteredStream {
    pub(crate) input: Arc<SocketInput>,
    pub(crate) output: Arc<dyn SocketOutput>,
    pub(crate) adapter: Option<Box<dyn FilterAdapter>>,
}

impl FilteredStream {
    /// Streams produced by a filter.
    #[must_use]
    pub fn new(input: Arc<SocketInput>, output: Arc<dyn SocketOutput>) -> Self {
        Self {
            input,
            output,
            adapter: None,
        }
    }

    /// Keep `adapter` alive until the socket closes.
    #[must_use]
    pub fn with_adapter(mut self, adapter: Box<dyn FilterAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Use the raw streams unchanged.
    #[must_use]
    pub fn passthrough(raw: RawStream) -> Self { Self::new(raw.input, raw.output) }
}

impl fmt::Debug for FilteredStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilteredStream")
            .field("adapter", &self.adapter.is_some())
            .finish_non_exhaustive()
    }
}

/// Transforms a connection's raw streams before it opens.
///
/// An error or panic from [`on_connection`](Self::on_connection) closes the
/// connection with [`CloseReason::SocketDisconnect`](crate::connection::CloseReason::SocketDisconnect).
#[async_trait]
pub trait ConnectionFilter: Send + Sync {
    /// Perform the handshake over `raw` and return the streams to use.
    async fn on_connection(&self, raw: RawStream) -> io::Result<FilteredStream>;
}

/// Filter that leaves the raw streams untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassthroughFilter;

#[async_trait]
impl ConnectionFilter for PassthroughFilter {
    async fn on_connection(&self, raw: RawStream) -> io::Result<FilteredStream> {
        Ok(FilteredStream::passthrough(raw))
    }
}
