//! Socket reactor boundary.
//!
//! A [`Reactor`] owns one socket. It allocates receive windows through the
//! [`ReactorCallbacks`] a connection registers, reports every completed read
//! and fires `socket_closed` exactly once when the socket is gone. Writes are
//! acknowledged through a [`WriteAck`] future.

pub mod memory;
pub mod tcp;

use std::{
    fmt,
    future::Future,
    io,
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use bytes::{BufMut, Bytes, BytesMut, buf::Limit};
pub use memory::MemoryReactor;
pub use tcp::TcpReactor;
use tokio::sync::oneshot;

/// Reactor status code for an orderly end of stream.
pub const UV_EOF: isize = -4095;

/// Reactor status code for a connection reset by the peer.
#[cfg(windows)]
pub const UV_ECONNRESET: isize = -4077;
/// Reactor status code for a connection reset by the peer.
#[cfg(target_os = "macos")]
pub const UV_ECONNRESET: isize = -54;
/// Reactor status code for a connection reset by the peer.
#[cfg(not(any(windows, target_os = "macos")))]
pub const UV_ECONNRESET: isize = -104;

/// Outcome of one read completion.
#[derive(Debug)]
pub enum ReadStatus {
    /// `n` bytes were written into the window. Zero means nothing happened.
    Bytes(usize),
    /// The peer ended the stream in an orderly way.
    Eof,
    /// The peer reset the connection.
    Reset,
    /// Any other transport failure.
    Error(io::Error),
}

impl ReadStatus {
    /// Interpret a raw read result in the reactor's signed convention.
    ///
    /// ```
    /// use brokerframe::reactor::{ReadStatus, UV_ECONNRESET, UV_EOF};
    ///
    /// assert!(matches!(ReadStatus::from_raw(12), ReadStatus::Bytes(12)));
    /// assert!(matches!(ReadStatus::from_raw(UV_EOF), ReadStatus::Eof));
    /// assert!(matches!(ReadStatus::from_raw(UV_ECONNRESET), ReadStatus::Reset));
    /// assert!(matches!(ReadStatus::from_raw(-32), ReadStatus::Error(_)));
    /// ```
    #[must_use]
    pub fn from_raw(nread: isize) -> Self {
        match nread {
            n if n >= 0 => Self::Bytes(n.unsigned_abs()),
            UV_EOF => Self::Eof,
            UV_ECONNRESET => Self::Reset,
            n => Self::Error(io::Error::from_raw_os_error(
                i32::try_from(n.unsigned_abs()).unwrap_or(i32::MAX),
            )),
        }
    }

    /// Map the result of an async read into a status.
    pub(crate) fn from_io(result: io::Result<usize>) -> Self {
        match result {
            Ok(0) => Self::Eof,
            Ok(n) => Self::Bytes(n),
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => Self::Reset,
            Err(e) => Self::Error(e),
        }
    }

    /// Whether no further reads will follow this one.
    #[must_use]
    pub fn ends_stream(&self) -> bool { !matches!(self, Self::Bytes(_)) }
}

/// Buffer a reactor reads into.
///
/// The writable region is capped at `limit` bytes regardless of how much
/// spare capacity the underlying buffer has.
pub struct ReadWindow {
    buffer: BytesMut,
    start: usize,
    limit: usize,
}

impl ReadWindow {
    /// Wrap `buffer`, allowing at most `limit` further bytes.
    #[must_use]
    pub fn new(mut buffer: BytesMut, limit: usize) -> Self {
        if buffer.capacity() - buffer.len() < limit {
            buffer.reserve(limit);
        }
        Self {
            start: buffer.len(),
            buffer,
            limit,
        }
    }

    /// Bytes that may still be written.
    #[must_use]
    pub fn remaining(&self) -> usize {
        let written = self.buffer.len() - self.start;
        self.limit
            .saturating_sub(written)
            .min(self.buffer.capacity() - self.buffer.len())
    }

    /// Bytes written so far.
    #[must_use]
    pub fn filled(&self) -> &[u8] { &self.buffer }

    /// Writable view bounded by the remaining window.
    pub fn buf_mut(&mut self) -> Limit<&mut BytesMut> {
        let remaining = self.remaining();
        (&mut self.buffer).limit(remaining)
    }

    /// Copy as much of `bytes` as fits, returning the number copied.
    pub fn fill_from(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.remaining());
        self.buffer.extend_from_slice(&bytes[..n]);
        n
    }

    /// Recover the underlying buffer.
    #[must_use]
    pub fn into_inner(self) -> BytesMut { self.buffer }
}

impl fmt::Debug for ReadWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadWindow")
            .field("filled", &self.buffer.len())
            .field("remaining", &self.remaining())
            .finish()
    }
}

/// Completion handlers a connection registers with its reactor.
pub trait ReactorCallbacks: Send + Sync {
    /// Provide a window for the next read.
    fn alloc(&self) -> ReadWindow;

    /// A read into `window` finished with `status`.
    fn read_completed(&self, window: ReadWindow, status: ReadStatus);

    /// The socket is closed. Fired exactly once.
    fn socket_closed(&self);
}

/// Completion future for a queued write or flush.
///
/// Dropping the future does not cancel the write.
#[must_use = "futures do nothing unless polled"]
pub struct WriteAck(AckState);

enum AckState {
    Ready(Option<io::Result<()>>),
    Pending(oneshot::Receiver<io::Result<()>>),
}

/// Sending half of a pending [`WriteAck`].
pub type AckSender = oneshot::Sender<io::Result<()>>;

impl WriteAck {
    /// An acknowledgement that has already completed.
    pub fn ready(result: io::Result<()>) -> Self { Self(AckState::Ready(Some(result))) }

    /// An acknowledgement completed later through the returned sender.
    pub fn pending() -> (AckSender, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self(AckState::Pending(rx)))
    }

    /// Acknowledgement for a write attempted on a closed socket.
    pub fn closed() -> Self { Self::ready(Err(io::ErrorKind::BrokenPipe.into())) }
}

impl Future for WriteAck {
    type Output = io::Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().0 {
            AckState::Ready(result) => {
                Poll::Ready(result.take().unwrap_or_else(|| Err(io::ErrorKind::Other.into())))
            }
            AckState::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|res| res.unwrap_or_else(|_| Err(io::ErrorKind::BrokenPipe.into()))),
        }
    }
}

impl fmt::Debug for WriteAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.0 {
            AckState::Ready(_) => "ready",
            AckState::Pending(_) => "pending",
        };
        f.debug_tuple("WriteAck").field(&state).finish()
    }
}

/// Byte sink a connection writes through.
///
/// The raw reactor is one; a [`ConnectionFilter`](crate::filter::ConnectionFilter)
/// may substitute its own.
pub trait SocketOutput: Send + Sync {
    /// Queue `data` for writing.
    fn write(&self, data: Bytes) -> WriteAck;

    /// Complete once everything queued so far has been written.
    fn flush(&self) -> WriteAck;

    /// Flush, then end the output side. The reactor closes the socket once
    /// the end has been written.
    fn end(&self);
}

/// A transport-level socket.
pub trait Reactor: Send + Sync {
    /// Begin or resume reading, delivering completions to `callbacks`.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket can no longer be read.
    fn read_start(&self, callbacks: Arc<dyn ReactorCallbacks>) -> io::Result<()>;

    /// Pause reading. Completions already in flight may still arrive.
    fn read_stop(&self);

    /// Queue `data` for writing.
    fn write(&self, data: Bytes) -> WriteAck;

    /// Complete once everything queued so far has been written.
    fn flush(&self) -> WriteAck;

    /// Flush pending writes, end the output side and close.
    fn shutdown(&self);

    /// Close immediately. Idempotent.
    fn close(&self);

    /// Address of the remote peer.
    fn peer_address(&self) -> Option<SocketAddr>;

    /// Address of the local end.
    fn local_address(&self) -> Option<SocketAddr>;
}

/// [`SocketOutput`] writing straight to a reactor.
pub(crate) struct RawOutput(pub(crate) Arc<dyn Reactor>);

impl SocketOutput for RawOutput {
    fn write(&self, data: Bytes) -> WriteAck { self.0.write(data) }

    fn flush(&self) -> WriteAck { self.0.flush() }

    fn end(&self) { self.0.shutdown(); }
}
