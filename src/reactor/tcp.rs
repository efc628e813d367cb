//! Tokio TCP reactor.
//!
//! Reads run on one task and writes on another, fed through an unbounded
//! channel so `write` never blocks the caller. Once both tasks exit the
//! registered callbacks receive `socket_closed`.

use std::{
    io,
    net::SocketAddr,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use bytes::Bytes;
use log::{debug, warn};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    runtime::Handle,
    select,
    sync::{mpsc, watch},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{AckSender, Reactor, ReactorCallbacks, ReadStatus, WriteAck};

enum WriteOp {
    Data(Bytes, AckSender),
    Flush(AckSender),
    Shutdown,
}

struct Shared {
    runtime: Handle,
    reader: Mutex<Option<OwnedReadHalf>>,
    callbacks: Mutex<Option<Arc<dyn ReactorCallbacks>>>,
    reading: watch::Sender<bool>,
    writes: mpsc::UnboundedSender<WriteOp>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    closed: AtomicBool,
}

impl Shared {
    fn callbacks(&self) -> MutexGuard<'_, Option<Arc<dyn ReactorCallbacks>>> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        self.tracker.close();
        let shared = Arc::clone(self);
        self.runtime.spawn(async move {
            shared.tracker.wait().await;
            let callbacks = shared.callbacks().take();
            if let Some(callbacks) = callbacks {
                callbacks.socket_closed();
            }
        });
    }
}

/// [`Reactor`] over a tokio [`TcpStream`].
///
/// Must be created inside a tokio runtime.
pub struct TcpReactor {
    shared: Arc<Shared>,
    peer: Option<SocketAddr>,
    local: Option<SocketAddr>,
}

impl TcpReactor {
    /// Take ownership of `stream` and start its writer task.
    #[must_use]
    pub fn new(stream: TcpStream) -> Arc<Self> {
        let peer = stream.peer_addr().ok();
        let local = stream.local_addr().ok();
        if let Err(e) = stream.set_nodelay(true) {
            debug!("failed to set TCP_NODELAY: peer={peer:?}, error={e}");
        }
        let (reader, writer) = stream.into_split();
        let (writes, queue) = mpsc::unbounded_channel();
        let (reading, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            runtime: Handle::current(),
            reader: Mutex::new(Some(reader)),
            callbacks: Mutex::new(None),
            reading,
            writes,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            closed: AtomicBool::new(false),
        });
        shared
            .tracker
            .spawn(write_loop(writer, queue, Arc::clone(&shared)));
        Arc::new(Self {
            shared,
            peer,
            local,
        })
    }

    fn enqueue(&self, op: WriteOp) -> Result<(), WriteOp> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(op);
        }
        self.shared.writes.send(op).map_err(|e| e.0)
    }
}

impl Reactor for TcpReactor {
    fn read_start(&self, callbacks: Arc<dyn ReactorCallbacks>) -> io::Result<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(io::ErrorKind::NotConnected.into());
        }
        *self.shared.callbacks() = Some(Arc::clone(&callbacks));
        let reader = self
            .shared
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reader) = reader {
            let rx = self.shared.reading.subscribe();
            self.shared
                .tracker
                .spawn(read_loop(reader, callbacks, rx, Arc::clone(&self.shared)));
        }
        self.shared.reading.send_replace(true);
        Ok(())
    }

    fn read_stop(&self) { self.shared.reading.send_replace(false); }

    fn write(&self, data: Bytes) -> WriteAck {
        let (tx, ack) = WriteAck::pending();
        match self.enqueue(WriteOp::Data(data, tx)) {
            Ok(()) => ack,
            Err(_) => WriteAck::closed(),
        }
    }

    fn flush(&self) -> WriteAck {
        let (tx, ack) = WriteAck::pending();
        match self.enqueue(WriteOp::Flush(tx)) {
            Ok(()) => ack,
            Err(_) => WriteAck::closed(),
        }
    }

    fn shutdown(&self) {
        if self.enqueue(WriteOp::Shutdown).is_err() {
            self.shared.close();
        }
    }

    fn close(&self) { self.shared.close(); }

    fn peer_address(&self) -> Option<SocketAddr> { self.peer }

    fn local_address(&self) -> Option<SocketAddr> { self.local }
}

impl Drop for TcpReactor {
    fn drop(&mut self) { self.shared.close(); }
}

#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
async fn read_loop(
    mut reader: OwnedReadHalf,
    callbacks: Arc<dyn ReactorCallbacks>,
    mut reading: watch::Receiver<bool>,
    shared: Arc<Shared>,
) {
    loop {
        select! {
            biased;

            () = shared.shutdown.cancelled() => break,
            res = async { reading.wait_for(|on| *on).await.map(|_| ()) } => {
                if res.is_err() {
                    break;
                }
            }
        }
        let mut window = callbacks.alloc();
        let mut buf = window.buf_mut();
        let status = select! {
            biased;

            () = shared.shutdown.cancelled() => None,
            res = reader.read_buf(&mut buf) => Some(ReadStatus::from_io(res)),
        };
        let Some(status) = status else {
            callbacks.read_completed(window, ReadStatus::Bytes(0));
            break;
        };
        let ends = status.ends_stream();
        callbacks.read_completed(window, status);
        if ends {
            break;
        }
    }
}

#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::UnboundedReceiver<WriteOp>,
    shared: Arc<Shared>,
) {
    loop {
        let op = select! {
            biased;

            () = shared.shutdown.cancelled() => break,
            op = queue.recv() => op,
        };
        match op {
            Some(WriteOp::Data(bytes, ack)) => {
                let res = writer.write_all(&bytes).await;
                let failed = res.as_ref().err().map(io::Error::kind);
                let _ = ack.send(res);
                if let Some(kind) = failed {
                    warn!("socket write failed: error={kind:?}");
                    break;
                }
            }
            Some(WriteOp::Flush(ack)) => {
                let _ = ack.send(writer.flush().await);
            }
            Some(WriteOp::Shutdown) | None => {
                if let Err(e) = writer.shutdown().await {
                    debug!("socket shutdown failed: error={e}");
                }
                break;
            }
        }
    }
    // Queued writes behind the exit point see their ack sender dropped.
    queue.close();
    shared.close();
}
