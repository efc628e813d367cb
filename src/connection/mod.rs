//! Connection lifecycle, I/O glue and liveness.
//!
//! A [`Connection`] binds a [`Reactor`] to a pair of processing pipelines.
//! Reads arrive through reactor callbacks, are queued on a [`SocketInput`]
//! and drained by a receive task that runs each segment through the decode
//! pipeline. Outgoing packets run through the encode pipeline and are
//! written through the current [`SocketOutput`].
//!
//! The state only ever advances: `Creating` to `Open` (or `ToDisconnect` if
//! aborted first), then `Disconnecting`, then `SocketClosed`. Disposal runs
//! exactly once, from whichever of the receive loop or the socket-closed
//! callback finishes first.

mod counter;
mod input;
mod state;
#[cfg(test)]
mod tests;

use std::{
    any::Any,
    fmt,
    net::SocketAddr,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        OnceLock,
        PoisonError,
        RwLock,
        Weak,
        atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use counter::LiveConnection;
pub use counter::live_connection_count;
use futures::FutureExt;
pub use input::{InputEvent, InputWriter, SocketInput};
use log::{debug, error, info, warn};
pub use state::{CloseReason, ConnectionKind, ConnectionState};
use tokio::{select, sync::watch, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    buffer::Segment,
    error::{ConnectionError, Result},
    filter::{ConnectionFilter, FilterAdapter, FilteredStream, RawStream},
    hooks::Client,
    id::ConnectionId,
    manager::ConnectionManager,
    metrics,
    panic::format_panic,
    processing::{ContextPool, ProcessingContext, ProcessingSettings},
    reactor::{RawOutput, Reactor, ReactorCallbacks, ReadStatus, ReadWindow, SocketOutput},
};

type DisconnectHook = Box<dyn FnOnce(&Connection) + Send>;

/// Everything a [`ConnectionFactory`](crate::factory::ConnectionFactory)
/// assembles for a new connection.
pub(crate) struct ConnectionParts {
    pub(crate) id: ConnectionId,
    pub(crate) kind: ConnectionKind,
    pub(crate) reactor: Arc<dyn Reactor>,
    pub(crate) decoding: ProcessingSettings,
    pub(crate) encoding: ProcessingSettings,
    pub(crate) contexts: Arc<ContextPool>,
    pub(crate) filter: Option<Arc<dyn ConnectionFilter>>,
    pub(crate) timeout: Duration,
    pub(crate) receive_chunk: usize,
}

/// A single network connection.
///
/// Always handled through an `Arc`; the reactor and the receive task hold
/// references while the socket is live.
pub struct Connection {
    id: ConnectionId,
    kind: ConnectionKind,
    state: AtomicU8,
    epoch: Instant,
    timeout_ms: AtomicU64,
    expires_ms: AtomicU64,
    receive_chunk: usize,
    reactor: Arc<dyn Reactor>,
    raw_input: Arc<SocketInput>,
    raw_writer: InputWriter,
    input: RwLock<Arc<SocketInput>>,
    output: RwLock<Arc<dyn SocketOutput>>,
    filter: Option<Arc<dyn ConnectionFilter>>,
    filter_adapter: Mutex<Option<Box<dyn FilterAdapter>>>,
    decoding: ProcessingSettings,
    encoding: ProcessingSettings,
    contexts: Arc<ContextPool>,
    client: OnceLock<Arc<dyn Client>>,
    callbacks: OnceLock<Arc<dyn ReactorCallbacks>>,
    manager: OnceLock<Weak<ConnectionManager>>,
    disconnect_hooks: Mutex<Vec<DisconnectHook>>,
    cancellation: OnceLock<CancellationToken>,
    closed: watch::Sender<bool>,
    stop_requested: AtomicBool,
    aborted: AtomicBool,
    disposed: AtomicBool,
    live: Mutex<Option<LiveConnection>>,
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn millis(duration: Duration) -> u64 { u64::try_from(duration.as_millis()).unwrap_or(u64::MAX) }

impl Connection {
    pub(crate) fn new(parts: ConnectionParts) -> Self {
        let ConnectionParts {
            id,
            kind,
            reactor,
            decoding,
            encoding,
            contexts,
            filter,
            timeout,
            receive_chunk,
        } = parts;
        let raw_input = Arc::new(SocketInput::new());
        let raw_writer = raw_input.writer();
        let output: Arc<dyn SocketOutput> = Arc::new(RawOutput(Arc::clone(&reactor)));
        let timeout_ms = millis(timeout);
        Self {
            id,
            kind,
            state: AtomicU8::new(ConnectionState::Creating as u8),
            epoch: Instant::now(),
            timeout_ms: AtomicU64::new(timeout_ms),
            expires_ms: AtomicU64::new(timeout_ms),
            receive_chunk: receive_chunk.max(1),
            reactor,
            input: RwLock::new(Arc::clone(&raw_input)),
            raw_input,
            raw_writer,
            output: RwLock::new(output),
            filter,
            filter_adapter: Mutex::new(None),
            decoding,
            encoding,
            contexts,
            client: OnceLock::new(),
            callbacks: OnceLock::new(),
            manager: OnceLock::new(),
            disconnect_hooks: Mutex::new(Vec::new()),
            cancellation: OnceLock::new(),
            closed: watch::channel(false).0,
            stop_requested: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            live: Mutex::new(Some(LiveConnection::new(kind))),
        }
    }

    /// Cluster-unique identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId { self.id }

    /// Whether the peer is a client or a mesh node.
    #[must_use]
    pub fn kind(&self) -> ConnectionKind { self.kind }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the connection has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool { self.disposed.load(Ordering::Acquire) }

    /// Address of the remote peer.
    #[must_use]
    pub fn remote_address(&self) -> Option<SocketAddr> { self.reactor.peer_address() }

    /// Address of the local end.
    #[must_use]
    pub fn local_address(&self) -> Option<SocketAddr> { self.reactor.local_address() }

    /// Pipeline turning received bytes into protocol state.
    #[must_use]
    pub fn decoding(&self) -> &ProcessingSettings { &self.decoding }

    /// Pipeline turning packets into bytes.
    #[must_use]
    pub fn encoding(&self) -> &ProcessingSettings { &self.encoding }

    /// The bound client, if any.
    #[must_use]
    pub fn client(&self) -> Option<&Arc<dyn Client>> { self.client.get() }

    /// Bind the protocol-level client.
    ///
    /// The client's [`on_bind`](Client::on_bind) runs before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::ClientAlreadyBound`] if a client is already
    /// bound.
    pub fn bind_client(self: &Arc<Self>, client: Arc<dyn Client>) -> Result<()> {
        self.client
            .set(Arc::clone(&client))
            .map_err(|_| ConnectionError::ClientAlreadyBound)?;
        client.on_bind(self);
        Ok(())
    }

    pub(crate) fn attach_manager(&self, manager: &Arc<ConnectionManager>) {
        let _ = self.manager.set(Arc::downgrade(manager));
    }

    /// Begin reading and open the connection.
    ///
    /// Without a filter the connection opens immediately. With one, the
    /// filter's handshake runs on a spawned task and the connection opens
    /// when it succeeds. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::InvalidState`] unless the connection is in
    /// [`ConnectionState::Creating`], or the reactor's error if reading
    /// cannot begin.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let state = self.state();
        if state != ConnectionState::Creating {
            return Err(ConnectionError::invalid_state("start", state));
        }
        let callbacks: Arc<dyn ReactorCallbacks> = Arc::new(Callbacks(Arc::downgrade(self)));
        if self.callbacks.set(Arc::clone(&callbacks)).is_err() {
            return Err(ConnectionError::invalid_state("start", state));
        }
        if let Err(e) = self.reactor.read_start(callbacks) {
            warn!("failed to start reading: id={}, error={e}", self.id);
            self.abort();
            self.abort_now();
            self.on_socket_closed();
            return Err(e.into());
        }
        debug!(
            "connection starting: id={}, kind={:?}, peer={:?}",
            self.id,
            self.kind,
            self.remote_address()
        );
        match self.filter.clone() {
            None => self.open(),
            Some(filter) => {
                tokio::spawn(Arc::clone(self).run_filter(filter));
            }
        }
        Ok(())
    }

    async fn run_filter(self: Arc<Self>, filter: Arc<dyn ConnectionFilter>) {
        let raw = RawStream {
            input: Arc::clone(&self.raw_input),
            output: self.output(),
            peer: self.remote_address(),
        };
        let outcome = std::panic::AssertUnwindSafe(filter.on_connection(raw))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(stream)) => {
                self.install(stream);
                self.open();
            }
            Ok(Err(e)) => {
                metrics::inc_errors();
                warn!("connection filter failed: id={}, error={e}", self.id);
                self.close(CloseReason::SocketDisconnect);
            }
            Err(panic) => {
                metrics::inc_errors();
                error!(
                    "connection filter panicked: id={}, panic={}",
                    self.id,
                    format_panic(panic)
                );
                self.close(CloseReason::SocketDisconnect);
            }
        }
    }

    fn install(&self, stream: FilteredStream) {
        let FilteredStream {
            input,
            output,
            adapter,
        } = stream;
        *self.input.write().unwrap_or_else(PoisonError::into_inner) = input;
        *self.output.write().unwrap_or_else(PoisonError::into_inner) = output;
        *lock(&self.filter_adapter) = adapter;
    }

    fn open(self: &Arc<Self>) {
        if !self.transition(ConnectionState::Creating, ConnectionState::Open) {
            debug!("connection aborted before opening: id={}", self.id);
            self.close(CloseReason::SocketDisconnect);
            return;
        }
        self.touch();
        info!(
            "connection opened: id={}, kind={:?}, peer={:?}",
            self.id,
            self.kind,
            self.remote_address()
        );
        if let Some(client) = self.client.get() {
            client.on_open(self);
        }
        tokio::spawn(Arc::clone(self).receive_loop());
    }

    async fn receive_loop(self: Arc<Self>) {
        let input = self.current_input();
        loop {
            match input.read().await {
                InputEvent::Data(segment) if self.stop_requested.load(Ordering::Acquire) => {
                    self.decoding.provider().release_segment(segment);
                }
                InputEvent::Data(segment) => self.receive(segment),
                InputEvent::Interrupted => {
                    if self.stop_requested.load(Ordering::Acquire) {
                        debug!("receive loop stopping: id={}", self.id);
                        break;
                    }
                }
                InputEvent::Completed => {
                    debug!("peer ended the stream: id={}", self.id);
                    break;
                }
                InputEvent::Failed(e) => {
                    warn!("receive failed: id={}, error={e}", self.id);
                    break;
                }
            }
        }
        self.close(CloseReason::SocketShutdown);
        self.dispose();
    }

    /// Run one receive pass over `segment` on the calling thread.
    ///
    /// The receive task calls this for every segment it reads. Hosts that
    /// drive a connection without starting it may call it directly.
    pub fn receive(&self, segment: Segment) {
        self.touch();
        ProcessingContext::receive(self, &self.decoding, &self.contexts, segment);
    }

    fn on_alloc(&self) -> ReadWindow {
        ReadWindow::new(
            self.decoding.provider().acquire(self.receive_chunk),
            self.receive_chunk,
        )
    }

    fn on_read_completed(&self, window: ReadWindow, status: ReadStatus) {
        let provider = self.decoding.provider();
        match status {
            ReadStatus::Bytes(0) => provider.release(window.into_inner()),
            ReadStatus::Bytes(_) => {
                self.touch();
                self.raw_writer.push(Segment::from(window.into_inner()));
            }
            ReadStatus::Eof | ReadStatus::Reset => {
                debug!("socket read ended: id={}, status={status:?}", self.id);
                provider.release(window.into_inner());
                self.raw_writer.complete();
            }
            ReadStatus::Error(e) => {
                metrics::inc_errors();
                warn!("socket read failed: id={}, error={e}", self.id);
                provider.release(window.into_inner());
                self.reactor.read_stop();
                // Queued ahead of the close events the abort produces.
                self.raw_writer.fail(e);
                self.abort();
            }
        }
    }

    /// Start closing the connection.
    ///
    /// [`CloseReason::ConnectionKeepAlive`] only applies to an open
    /// connection. Other reasons apply to any connection that is not
    /// already disconnecting or closed. Closing moves to
    /// [`ConnectionState::Disconnecting`] and tells the output side to flush
    /// and end.
    pub fn close(&self, reason: CloseReason) {
        let advanced = match reason {
            CloseReason::ConnectionKeepAlive => {
                self.transition(ConnectionState::Open, ConnectionState::Disconnecting)
            }
            CloseReason::SocketShutdown | CloseReason::SocketDisconnect => {
                self.advance_to(ConnectionState::Disconnecting)
            }
        };
        if !advanced {
            return;
        }
        info!("connection closing: id={}, reason={reason}", self.id);
        self.output().end();
    }

    /// Abort the connection.
    ///
    /// A connection still in [`ConnectionState::Creating`] is only marked
    /// [`ConnectionState::ToDisconnect`]; it never opens. Otherwise the
    /// socket is closed and the cancellation token fires, once.
    pub fn abort(&self) {
        if self.transition(ConnectionState::Creating, ConnectionState::ToDisconnect) {
            debug!("connection aborted before opening: id={}", self.id);
            return;
        }
        self.abort_now();
    }

    fn abort_now(&self) {
        if self.aborted.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(token) = self.cancellation.get() {
            token.cancel();
        }
        debug!("connection aborting: id={}", self.id);
        self.reactor.close();
    }

    /// Ask the connection to stop and wait until its socket has closed.
    pub async fn stop(&self) {
        self.request_stop();
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// The non-waiting half of [`stop`](Self::stop).
    ///
    /// An open connection finishes its current receive pass and then
    /// closes; one that never started is torn down immediately, whatever
    /// its state.
    pub fn request_stop(&self) {
        let state = self.state();
        if state != ConnectionState::SocketClosed && self.callbacks.get().is_none() {
            // Never started: the reactor has nobody to report the close to.
            self.transition(ConnectionState::Creating, ConnectionState::ToDisconnect);
            self.abort_now();
            self.on_socket_closed();
            return;
        }
        match state {
            ConnectionState::SocketClosed => {}
            ConnectionState::Creating | ConnectionState::ToDisconnect => {
                self.transition(ConnectionState::Creating, ConnectionState::ToDisconnect);
                self.abort_now();
            }
            ConnectionState::Open | ConnectionState::Disconnecting => {
                self.stop_requested.store(true, Ordering::Release);
                self.current_input().interrupt();
            }
        }
    }

    fn on_socket_closed(&self) {
        if !self.advance_to(ConnectionState::SocketClosed) {
            return;
        }
        debug!("socket closed: id={}", self.id);
        if let Some(adapter) = lock(&self.filter_adapter).take() {
            adapter.dispose();
        }
        self.stop_requested.store(true, Ordering::Release);
        self.raw_writer.complete();
        self.current_input().interrupt();
        self.closed.send_replace(true);
        self.abort_now();
        self.dispose();
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(manager) = self.manager.get().and_then(Weak::upgrade) {
            manager.unregister(self.id);
        }
        self.release_queues();
        let hooks = std::mem::take(&mut *lock(&self.disconnect_hooks));
        if let Some(client) = self.client.get() {
            client.on_disconnect(self);
        }
        for hook in hooks {
            hook(self);
        }
        lock(&self.live).take();
        info!("connection disposed: id={}", self.id);
    }

    fn release_queues(&self) {
        for settings in [&self.decoding, &self.encoding] {
            // A pass still running on this thread keeps its segments; they
            // are released when the connection drops.
            if let Some(mut queues) = settings.try_lock_pending() {
                queues.release_all(settings.provider().as_ref());
            }
        }
    }

    /// Register `hook` to run when the connection is disposed.
    ///
    /// Runs immediately if the connection is already disposed.
    pub fn on_disconnect<F>(&self, hook: F)
    where
        F: FnOnce(&Connection) + Send + 'static,
    {
        {
            let mut hooks = lock(&self.disconnect_hooks);
            if !self.disposed.load(Ordering::Acquire) {
                hooks.push(Box::new(hook));
                return;
            }
        }
        hook(self);
    }

    /// Token cancelled when the connection aborts.
    ///
    /// Created on first use; already cancelled if the connection aborted
    /// before anyone asked for it.
    pub fn cancellation_token(&self) -> CancellationToken {
        let token = self.cancellation.get_or_init(CancellationToken::new).clone();
        if self.aborted.load(Ordering::SeqCst) {
            token.cancel();
        }
        token
    }

    /// Whether the connection is open, not stopping, and within its idle
    /// deadline. Mesh connections never expire.
    #[must_use]
    pub fn check_alive(&self) -> bool {
        if self.state() != ConnectionState::Open
            || self.stop_requested.load(Ordering::Acquire)
            || self.aborted.load(Ordering::Acquire)
        {
            return false;
        }
        self.kind == ConnectionKind::Mesh
            || self.elapsed_ms() <= self.expires_ms.load(Ordering::Acquire)
    }

    /// Idle timeout added to the clock on every read or write.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Acquire))
    }

    /// Replace the idle timeout and push the deadline out accordingly.
    pub fn set_timeout(&self, timeout: Duration) {
        self.timeout_ms.store(millis(timeout), Ordering::Release);
        self.touch();
    }

    /// Instant after which an idle client connection counts as dead.
    #[must_use]
    pub fn expires(&self) -> Instant {
        self.epoch + Duration::from_millis(self.expires_ms.load(Ordering::Acquire))
    }

    /// Record activity, pushing the idle deadline out by the timeout.
    pub fn touch(&self) {
        let deadline = self
            .elapsed_ms()
            .saturating_add(self.timeout_ms.load(Ordering::Acquire));
        self.expires_ms.store(deadline, Ordering::Release);
    }

    fn elapsed_ms(&self) -> u64 { millis(self.epoch.elapsed()) }

    /// Run `packet` through the encode pipeline without writing it.
    ///
    /// # Panics
    ///
    /// Panics if an encode processor returns
    /// [`ProcessingState::InsufficientData`](crate::processing::ProcessingState::InsufficientData).
    pub fn encode<P: Any + Send>(&self, packet: P) -> Option<Segment> {
        ProcessingContext::send(self, &self.encoding, &self.contexts, Box::new(packet))
    }

    /// Encode `packet` and write the result.
    ///
    /// Nothing is written when the pipeline produces no bytes. Must not be
    /// called from an encode processor of the same connection.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Closed`] once the connection is closing.
    ///
    /// # Panics
    ///
    /// Panics under the same conditions as [`encode`](Self::encode).
    pub fn send<P: Any + Send>(&self, packet: P) -> Result<()> {
        self.ensure_writable()?;
        let Some(encoded) = self.encode(packet) else {
            return Ok(());
        };
        let bytes = Bytes::copy_from_slice(&encoded);
        self.encoding.provider().release_segment(encoded);
        if bytes.is_empty() {
            return Ok(());
        }
        metrics::inc_packets_sent();
        self.write(bytes)
    }

    /// Queue raw bytes without waiting for the write to finish.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Closed`] once the connection is closing.
    pub fn write(&self, data: impl Into<Bytes>) -> Result<()> {
        self.ensure_writable()?;
        let data = data.into();
        if data.is_empty() {
            return Ok(());
        }
        self.touch();
        let _ack = self.output().write(data);
        Ok(())
    }

    /// Write raw bytes and wait for the reactor to acknowledge them.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Cancelled`] if `cancel` fires first,
    /// [`ConnectionError::Closed`] once the connection is closing, or the
    /// transport's error.
    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    pub async fn write_async(
        &self,
        data: impl Into<Bytes>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.ensure_writable()?;
        self.touch();
        let ack = self.output().write(data.into());
        select! {
            biased;

            () = cancel.cancelled() => Err(ConnectionError::Cancelled),
            res = ack => res.map_err(ConnectionError::from),
        }
    }

    /// Ask the output side to flush without waiting.
    pub fn flush(&self) { let _ack = self.output().flush(); }

    /// Flush and wait for completion.
    ///
    /// # Errors
    ///
    /// Returns the transport's error.
    pub async fn flush_async(&self) -> Result<()> {
        self.output().flush().await?;
        Ok(())
    }

    /// Stop reading from the socket until [`resume`](Self::resume).
    pub fn pause(&self) { self.reactor.read_stop(); }

    /// Resume reading after [`pause`](Self::pause).
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::InvalidState`] if the connection was never
    /// started, or the reactor's error.
    pub fn resume(&self) -> Result<()> {
        let Some(callbacks) = self.callbacks.get() else {
            return Err(ConnectionError::invalid_state("resume", self.state()));
        };
        self.reactor.read_start(Arc::clone(callbacks))?;
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Creating | ConnectionState::Open
                if !self.aborted.load(Ordering::Acquire) =>
            {
                Ok(())
            }
            _ => Err(ConnectionError::Closed),
        }
    }

    fn current_input(&self) -> Arc<SocketInput> {
        self.input
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn output(&self) -> Arc<dyn SocketOutput> {
        self.output
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn advance_to(&self, to: ConnectionState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if !ConnectionState::from_u8(current).can_advance_to(to) {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.callbacks.get().is_some() && !*self.disposed.get_mut() {
            error!("connection dropped without disposal: id={}", self.id);
            debug_assert!(
                std::thread::panicking(),
                "connection {} dropped without disposal",
                self.id
            );
        }
        self.release_queues();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

/// Reactor callbacks routed to a connection that may already be gone.
struct Callbacks(Weak<Connection>);

impl ReactorCallbacks for Callbacks {
    fn alloc(&self) -> ReadWindow {
        self.0.upgrade().map_or_else(
            || ReadWindow::new(bytes::BytesMut::new(), 0),
            |conn| conn.on_alloc(),
        )
    }

    fn read_completed(&self, window: ReadWindow, status: ReadStatus) {
        if let Some(conn) = self.0.upgrade() {
            conn.on_read_completed(window, status);
        }
    }

    fn socket_closed(&self) {
        if let Some(conn) = self.0.upgrade() {
            conn.on_socket_closed();
        }
    }
}
