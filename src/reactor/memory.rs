//! In-process reactor driven by hand.
//!
//! [`MemoryReactor`] stands in for a socket when embedding connections in
//! tests or simulations. Reads are injected with [`MemoryReactor::deliver`],
//! writes are captured, and closing fires `socket_closed` synchronously on
//! the calling thread.

use std::{
    fmt,
    io,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use bytes::{Bytes, BytesMut};

use super::{AckSender, Reactor, ReactorCallbacks, ReadStatus, WriteAck};

#[derive(Default)]
struct MemoryState {
    callbacks: Option<Arc<dyn ReactorCallbacks>>,
    reading: bool,
    written: BytesMut,
    held: Vec<AckSender>,
    hold_acks: bool,
    shut_down: bool,
    closed: bool,
    notified: bool,
}

/// Reactor backed by in-memory buffers.
pub struct MemoryReactor {
    state: Mutex<MemoryState>,
    manual_close: bool,
    peer: Option<SocketAddr>,
    local: Option<SocketAddr>,
}

impl MemoryReactor {
    /// Create a reactor whose `shutdown` closes the socket immediately.
    #[must_use]
    pub fn new() -> Arc<Self> { Arc::new(Self::build(false)) }

    /// Create a reactor whose `shutdown` only records the request.
    ///
    /// The socket stays open until [`close`](Reactor::close) is called,
    /// which lets tests observe the `Disconnecting` state.
    #[must_use]
    pub fn with_manual_close() -> Arc<Self> { Arc::new(Self::build(true)) }

    fn build(manual_close: bool) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            manual_close,
            peer: "127.0.0.1:40000".parse().ok(),
            local: "127.0.0.1:7000".parse().ok(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reader(&self) -> Option<Arc<dyn ReactorCallbacks>> {
        let state = self.lock();
        if state.reading && !state.closed {
            state.callbacks.clone()
        } else {
            None
        }
    }

    /// Deliver `bytes` as one or more reads.
    ///
    /// Bytes are split across as many windows as the registered callbacks
    /// hand out. Returns `false` if reading is paused or the socket closed.
    pub fn deliver(&self, bytes: &[u8]) -> bool {
        let mut rest = bytes;
        while !rest.is_empty() {
            let Some(callbacks) = self.reader() else {
                return false;
            };
            let mut window = callbacks.alloc();
            let n = window.fill_from(rest);
            rest = &rest[n..];
            callbacks.read_completed(window, ReadStatus::Bytes(n));
            if n == 0 {
                return false;
            }
        }
        true
    }

    /// Deliver a read completion carrying `status` and no bytes.
    pub fn deliver_status(&self, status: ReadStatus) -> bool {
        let Some(callbacks) = self.reader() else {
            return false;
        };
        let window = callbacks.alloc();
        callbacks.read_completed(window, status);
        true
    }

    /// Everything written so far.
    #[must_use]
    pub fn written(&self) -> Bytes { Bytes::copy_from_slice(&self.lock().written) }

    /// Remove and return everything written so far.
    pub fn take_written(&self) -> Bytes { self.lock().written.split().freeze() }

    /// Keep write acknowledgements pending until [`release_acks`](Self::release_acks).
    pub fn hold_acks(&self, hold: bool) { self.lock().hold_acks = hold; }

    /// Complete every held acknowledgement successfully.
    pub fn release_acks(&self) {
        let held = std::mem::take(&mut self.lock().held);
        for ack in held {
            let _ = ack.send(Ok(()));
        }
    }

    /// Whether reads are currently enabled.
    #[must_use]
    pub fn is_reading(&self) -> bool { self.lock().reading }

    /// Whether the output side was ended.
    #[must_use]
    pub fn is_shut_down(&self) -> bool { self.lock().shut_down }

    /// Whether the socket was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.lock().closed }

    fn ack(&self) -> WriteAck {
        let mut state = self.lock();
        if state.closed {
            return WriteAck::closed();
        }
        if state.hold_acks {
            let (tx, ack) = WriteAck::pending();
            state.held.push(tx);
            ack
        } else {
            WriteAck::ready(Ok(()))
        }
    }
}

impl Reactor for MemoryReactor {
    fn read_start(&self, callbacks: Arc<dyn ReactorCallbacks>) -> io::Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(io::ErrorKind::NotConnected.into());
        }
        state.callbacks = Some(callbacks);
        state.reading = true;
        Ok(())
    }

    fn read_stop(&self) { self.lock().reading = false; }

    fn write(&self, data: Bytes) -> WriteAck {
        {
            let mut state = self.lock();
            if state.closed || state.shut_down {
                return WriteAck::closed();
            }
            state.written.extend_from_slice(&data);
        }
        self.ack()
    }

    fn flush(&self) -> WriteAck { self.ack() }

    fn shutdown(&self) {
        self.lock().shut_down = true;
        if !self.manual_close {
            self.close();
        }
    }

    fn close(&self) {
        let callbacks = {
            let mut state = self.lock();
            state.closed = true;
            state.reading = false;
            for ack in state.held.drain(..) {
                let _ = ack.send(Err(io::ErrorKind::BrokenPipe.into()));
            }
            if state.notified {
                return;
            }
            state.notified = true;
            state.callbacks.take()
        };
        if let Some(callbacks) = callbacks {
            callbacks.socket_closed();
        }
    }

    fn peer_address(&self) -> Option<SocketAddr> { self.peer }

    fn local_address(&self) -> Option<SocketAddr> { self.local }
}

impl fmt::Debug for MemoryReactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryReactor")
            .field("reading", &state.reading)
            .field("written", &state.written.len())
            .field("shut_down", &state.shut_down)
            .field("closed", &state.closed)
            .finish_non_exhaustive()
    }
}
