//! Execution of one pipeline pass.
//!
//! A [`ProcessingContext`] exists only for the duration of a single receive
//! or send pass. It borrows the connection, the direction's settings and the
//! guard over that direction's pending queues, so every helper a processor
//! calls runs inside the same critical section as the pass itself. The
//! reusable parts of a context (cursor, redirect buffer, scratch slots) are
//! recycled through a [`ContextPool`].

use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use log::{debug, error};

use super::{PendingQueues, ProcessingSettings, ProcessingState, Processor};
use crate::{buffer::Segment, connection::Connection, metrics, panic::format_panic};

/// Reusable state of a processing context.
#[derive(Default)]
struct Frame {
    base: Option<Arc<[Processor]>>,
    redirect: Vec<Processor>,
    redirected: bool,
    current: usize,
    buffer: Option<Segment>,
    session: Option<Box<dyn Any + Send>>,
    packet: Option<Box<dyn Any + Send>>,
}

impl Frame {
    fn reset(&mut self) {
        self.base = None;
        self.redirect.clear();
        self.redirected = false;
        self.current = 0;
        self.buffer = None;
        self.session = None;
        self.packet = None;
    }

    fn count(&self) -> usize {
        if self.redirected {
            self.redirect.len()
        } else {
            self.base.as_ref().map_or(0, |base| base.len())
        }
    }

    fn processor_at(&self, index: usize) -> Option<Processor> {
        if self.redirected {
            self.redirect.get(index).cloned()
        } else {
            self.base.as_ref().and_then(|base| base.get(index)).cloned()
        }
    }
}

/// Bounded pool of reusable context frames.
pub struct ContextPool {
    frames: Mutex<Vec<Frame>>,
    capacity: usize,
}

impl ContextPool {
    /// Create a pool retaining at most `capacity` idle frames.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Number of idle frames ready for reuse.
    #[must_use]
    pub fn idle(&self) -> usize { self.lock().len() }

    fn acquire(&self) -> Frame { self.lock().pop().unwrap_or_default() }

    fn recycle(&self, mut frame: Frame) {
        frame.reset();
        let mut frames = self.lock();
        if frames.len() < self.capacity {
            frames.push(frame);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Frame>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ContextPool {
    fn default() -> Self { Self::new(64) }
}

impl fmt::Debug for ContextPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextPool")
            .field("idle", &self.idle())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Result of a completed receive pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReceiveOutcome {
    /// Every pending segment was consumed, stopped or deferred.
    Drained,
    /// A processor asked for more bytes; the segment waits at the queue head.
    Incomplete,
    /// A processor panicked; the offending segment was dropped.
    Panicked,
}

/// Execution frame for a single pipeline pass.
pub struct ProcessingContext<'a> {
    connection: &'a Connection,
    settings: &'a ProcessingSettings,
    queues: MutexGuard<'a, PendingQueues>,
    frame: Frame,
}

impl<'a> ProcessingContext<'a> {
    fn new(
        connection: &'a Connection,
        settings: &'a ProcessingSettings,
        frame: Frame,
    ) -> Self {
        Self {
            connection,
            settings,
            queues: settings.lock_pending(),
            frame,
        }
    }

    /// Run one receive pass over `segment`.
    ///
    /// The segment is queued behind any segment left over from an earlier
    /// incomplete pass, then pending segments are decoded in arrival order
    /// until the queue drains or a processor reports
    /// [`ProcessingState::InsufficientData`]. A panicking processor is logged
    /// and ends the pass; the connection stays alive.
    pub(crate) fn receive(
        connection: &'a Connection,
        settings: &'a ProcessingSettings,
        pool: &ContextPool,
        segment: Segment,
    ) -> ReceiveOutcome {
        let mut ctx = Self::new(connection, settings, pool.acquire());
        let result = panic::catch_unwind(AssertUnwindSafe(|| ctx.run_receive(segment)));
        ctx.queues.restore_deferred();
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(payload) => {
                metrics::inc_pipeline_errors();
                error!(
                    "decode processor panicked: id={}, panic={}",
                    connection.id(),
                    format_panic(payload)
                );
                ctx.release_buffer();
                ReceiveOutcome::Panicked
            }
        };
        pool.recycle(ctx.into_frame());
        outcome
    }

    /// Run one send pass for `packet`, returning the encoded bytes.
    ///
    /// `None` or an empty segment means there is nothing to write.
    ///
    /// # Panics
    ///
    /// Panics if an encode processor returns
    /// [`ProcessingState::InsufficientData`]; outgoing packets are always
    /// complete, so this indicates a broken processor.
    pub(crate) fn send(
        connection: &'a Connection,
        settings: &'a ProcessingSettings,
        pool: &ContextPool,
        packet: Box<dyn Any + Send>,
    ) -> Option<Segment> {
        let mut ctx = Self::new(connection, settings, pool.acquire());
        ctx.reset_cursor();
        ctx.frame.packet = Some(packet);
        let state = ctx.run_pipeline();
        assert!(
            state != ProcessingState::InsufficientData,
            "encode processor returned InsufficientData on connection {}",
            connection.id()
        );
        let encoded = ctx.frame.buffer.take();
        pool.recycle(ctx.into_frame());
        encoded
    }

    fn run_receive(&mut self, segment: Segment) -> ReceiveOutcome {
        let resumed = !self.queues.pending.is_empty();
        self.queues.pending.push_back(segment);

        while let Some(segment) = self.next_pending(resumed) {
            metrics::inc_segments(self.settings.kind());
            self.reset_cursor();
            self.frame.buffer = Some(segment);
            match self.run_pipeline() {
                ProcessingState::InsufficientData => {
                    if let Some(partial) = self.frame.buffer.take() {
                        debug!(
                            "awaiting more bytes: id={}, buffered={}",
                            self.connection.id(),
                            partial.len()
                        );
                        self.queues.pending.push_front(partial);
                    }
                    return ReceiveOutcome::Incomplete;
                }
                ProcessingState::HandleLater => {
                    if let Some(parked) = self.frame.buffer.take() {
                        self.queues.deferred.push_back(parked);
                    }
                }
                ProcessingState::Stop | ProcessingState::Success | ProcessingState::Failure => {
                    self.release_buffer();
                }
            }
        }
        ReceiveOutcome::Drained
    }

    /// Dequeue the next segment, joining a leftover partial segment with the
    /// segment delivered after it.
    fn next_pending(&mut self, resumed: bool) -> Option<Segment> {
        if resumed && self.queues.pending.len() == 2 {
            let partial = self.queues.pending.pop_front()?;
            let next = self.queues.pending.pop_front()?;
            return Some(partial.join(next, self.settings.provider().as_ref()));
        }
        self.queues.pending.pop_front()
    }

    /// Execute processors from the cursor until one ends the pass or the
    /// pipeline is exhausted.
    fn run_pipeline(&mut self) -> ProcessingState {
        while let Some(processor) = self.advance() {
            match processor.process(self.connection, self) {
                ProcessingState::Success | ProcessingState::Failure => {}
                finished => return finished,
            }
        }
        ProcessingState::Success
    }

    fn advance(&mut self) -> Option<Processor> {
        let processor = self.frame.processor_at(self.frame.current)?;
        self.frame.current += 1;
        Some(processor)
    }

    fn reset_cursor(&mut self) {
        self.frame.base = Some(self.settings.snapshot());
        self.frame.redirect.clear();
        self.frame.redirected = false;
        self.frame.current = 0;
    }

    fn release_buffer(&mut self) {
        if let Some(segment) = self.frame.buffer.take() {
            self.settings.provider().release_segment(segment);
        }
    }

    fn into_frame(mut self) -> Frame { std::mem::take(&mut self.frame) }

    /// Connection this pass runs for.
    #[must_use]
    pub fn connection(&self) -> &'a Connection { self.connection }

    /// Settings whose pipeline is executing.
    #[must_use]
    pub fn settings(&self) -> &'a ProcessingSettings { self.settings }

    /// Index of the next processor to run.
    #[must_use]
    pub fn position(&self) -> usize { self.frame.current }

    /// Number of processors in the active pipeline.
    #[must_use]
    pub fn count(&self) -> usize { self.frame.count() }

    /// Replace the rest of the pipeline with `processors`.
    ///
    /// The cursor moves to the first of the new processors, which runs as
    /// soon as the current processor returns a continuing state.
    pub fn redirect<I>(&mut self, processors: I)
    where
        I: IntoIterator<Item = Processor>,
    {
        self.frame.redirect.clear();
        self.frame.redirect.extend(processors);
        self.frame.redirected = true;
        self.frame.current = 0;
    }

    /// Bytes currently being processed.
    #[must_use]
    pub fn buffer(&self) -> Option<&Segment> { self.frame.buffer.as_ref() }

    /// Mutable access to the bytes currently being processed.
    pub fn buffer_mut(&mut self) -> Option<&mut Segment> { self.frame.buffer.as_mut() }

    /// Take ownership of the current buffer.
    ///
    /// The caller becomes responsible for releasing it.
    pub fn take_buffer(&mut self) -> Option<Segment> { self.frame.buffer.take() }

    /// Install `segment` as the current buffer, releasing the previous one.
    pub fn switch_buffer(&mut self, segment: Segment) {
        self.release_buffer();
        self.frame.buffer = Some(segment);
    }

    /// Ensure the current buffer has room for `additional` more bytes,
    /// acquiring one from the provider if none is installed.
    pub fn reserve(&mut self, additional: usize) -> &mut Segment {
        let provider = self.settings.provider();
        let segment = self.frame.buffer.get_or_insert_with(|| {
            Segment::from(provider.acquire(additional.max(provider.segment_capacity())))
        });
        segment.reserve(additional);
        segment
    }

    /// Append `bytes` to the current buffer.
    pub fn write(&mut self, bytes: &[u8]) { self.reserve(bytes.len()).extend_from_slice(bytes); }

    /// Park the bytes from `offset` onwards for the next receive pass.
    ///
    /// The current buffer keeps `[0, offset)`; an `offset` of zero parks the
    /// whole buffer.
    pub fn throttle(&mut self, offset: usize) {
        if let Some(tail) = self.split_tail(offset) {
            self.queues.deferred.push_back(tail);
        }
    }

    /// Queue the bytes from `offset` onwards to be decoded next in this pass.
    ///
    /// Used when one delivery carries more than one frame.
    pub fn split_remaining(&mut self, offset: usize) {
        if let Some(tail) = self.split_tail(offset) {
            self.queues.pending.push_front(tail);
        }
    }

    fn split_tail(&mut self, offset: usize) -> Option<Segment> {
        if offset == 0 {
            return self.frame.buffer.take();
        }
        let tail = self.frame.buffer.as_mut()?.split_off(offset);
        (!tail.is_empty()).then_some(tail)
    }

    /// Segments waiting for later processing on this direction.
    #[must_use]
    pub fn queues(&self) -> &PendingQueues { &self.queues }

    /// Store cross-processor scratch state for the rest of this pass.
    pub fn set_session<T: Any + Send>(&mut self, session: T) {
        self.frame.session = Some(Box::new(session));
    }

    /// Borrow the scratch state if it has type `T`.
    pub fn session_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.frame.session.as_mut()?.downcast_mut()
    }

    /// Remove and return the scratch state if it has type `T`.
    pub fn take_session<T: Any + Send>(&mut self) -> Option<T> {
        match self.frame.session.take()?.downcast::<T>() {
            Ok(session) => Some(*session),
            Err(other) => {
                self.frame.session = Some(other);
                None
            }
        }
    }

    /// Packet being encoded, or a decoded packet published by an earlier
    /// processor, if it has type `T`.
    #[must_use]
    pub fn packet<T: Any + Send>(&self) -> Option<&T> { self.frame.packet.as_ref()?.downcast_ref() }

    /// Publish a decoded packet for the processors that follow.
    pub fn set_packet<T: Any + Send>(&mut self, packet: T) {
        self.frame.packet = Some(Box::new(packet));
    }

    /// Remove and return the packet if it has type `T`.
    pub fn take_packet<T: Any + Send>(&mut self) -> Option<T> {
        match self.frame.packet.take()?.downcast::<T>() {
            Ok(packet) => Some(*packet),
            Err(other) => {
                self.frame.packet = Some(other);
                None
            }
        }
    }
}

impl fmt::Debug for ProcessingContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingContext")
            .field("connection", &self.connection.id())
            .field("kind", &self.settings.kind())
            .field("position", &self.frame.current)
            .field("count", &self.frame.count())
            .field("buffer", &self.frame.buffer)
            .finish_non_exhaustive()
    }
}
