//! Pipeline configuration for one processing direction.

use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, TryLockError},
};

use super::{ProcessingType, Processor};
use crate::buffer::{BufferProvider, Segment};

/// Segments awaiting a receive pass.
///
/// `pending` holds segments for the next pass in arrival order, including a
/// partially decoded segment at its head. `deferred` collects segments parked
/// with [`ProcessingState::HandleLater`](super::ProcessingState::HandleLater)
/// during the running pass; they rejoin `pending` when the pass exits.
#[derive(Default)]
pub struct PendingQueues {
    pub(crate) pending: VecDeque<Segment>,
    pub(crate) deferred: VecDeque<Segment>,
}

impl PendingQueues {
    /// Number of segments waiting for the next pass.
    #[must_use]
    pub fn pending_len(&self) -> usize { self.pending.len() }

    /// Number of segments parked during the running pass.
    #[must_use]
    pub fn deferred_len(&self) -> usize { self.deferred.len() }

    /// Total bytes held by both queues.
    #[must_use]
    pub fn buffered_bytes(&self) -> usize {
        self.pending.iter().chain(&self.deferred).map(|s| s.len()).sum()
    }

    /// Queue `segment` behind everything already pending.
    pub fn push_pending(&mut self, segment: Segment) { self.pending.push_back(segment); }

    /// Move deferred segments back onto the pending queue.
    pub(crate) fn restore_deferred(&mut self) {
        let deferred = std::mem::take(&mut self.deferred);
        self.pending.extend(deferred);
    }

    /// Release every queued segment into `provider`.
    pub fn release_all(&mut self, provider: &dyn BufferProvider) {
        for segment in self.pending.drain(..).chain(self.deferred.drain(..)) {
            provider.release_segment(segment);
        }
    }
}

/// Ordered processor chain, buffer provider and pending queue for one
/// direction of a connection.
///
/// Structural mutations rebuild the cached snapshot under the pipeline lock,
/// so a reader sees either the chain before a mutation or the chain after
/// it. The pending queues live behind a separate lock that also serialises
/// receive passes.
pub struct ProcessingSettings {
    kind: ProcessingType,
    pipeline: Mutex<Vec<Processor>>,
    snapshot: RwLock<Arc<[Processor]>>,
    provider: Arc<dyn BufferProvider>,
    queues: Mutex<PendingQueues>,
}

impl ProcessingSettings {
    /// Create an empty pipeline for `kind` backed by `provider`.
    #[must_use]
    pub fn new(kind: ProcessingType, provider: Arc<dyn BufferProvider>) -> Self {
        Self {
            kind,
            pipeline: Mutex::new(Vec::new()),
            snapshot: RwLock::new(Arc::from(Vec::new())),
            provider,
            queues: Mutex::new(PendingQueues::default()),
        }
    }

    /// Direction served by this pipeline.
    #[must_use]
    pub fn kind(&self) -> ProcessingType { self.kind }

    /// Buffer provider dedicated to this direction.
    #[must_use]
    pub fn provider(&self) -> &Arc<dyn BufferProvider> { &self.provider }

    /// Current immutable view of the pipeline.
    #[must_use]
    pub fn snapshot(&self) -> Arc<[Processor]> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Number of processors in the pipeline.
    #[must_use]
    pub fn len(&self) -> usize { self.snapshot().len() }

    /// Returns `true` when the pipeline has no processors.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Returns `true` if a processor named like `processor` is present.
    #[must_use]
    pub fn contains(&self, processor: &Processor) -> bool { self.snapshot().contains(processor) }

    /// Processor names in pipeline order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.snapshot().iter().map(Processor::name).collect()
    }

    /// Lock the pending queues.
    ///
    /// This is the same lock held for the duration of a receive pass. Code
    /// running inside a processor already holds it and must use the
    /// [`ProcessingContext`](super::ProcessingContext) helpers instead.
    pub fn lock_pending(&self) -> MutexGuard<'_, PendingQueues> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the pending queues unless a pass currently holds them.
    pub(crate) fn try_lock_pending(&self) -> Option<MutexGuard<'_, PendingQueues>> {
        match self.queues.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Insert `processor` at the head of the pipeline.
    pub fn add_first(&self, processor: Processor) {
        self.mutate(|chain| chain.insert(0, processor));
    }

    /// Append `processor` to the tail of the pipeline.
    pub fn add_last(&self, processor: Processor) { self.mutate(|chain| chain.push(processor)); }

    /// Remove every occurrence of `processor`, then insert it at the head.
    pub fn add_first_unique(&self, processor: Processor) {
        self.mutate(|chain| {
            chain.retain(|p| *p != processor);
            chain.insert(0, processor);
        });
    }

    /// Insert `processor` before the first occurrence of `anchor`, or at the
    /// head when `anchor` is absent.
    pub fn add_before_or_first(&self, anchor: &Processor, processor: Processor) {
        self.mutate(|chain| {
            let at = chain.iter().position(|p| p == anchor).unwrap_or(0);
            chain.insert(at, processor);
        });
    }

    /// Insert `processor` before the first occurrence of `anchor`, or at the
    /// tail when `anchor` is absent.
    pub fn add_before_or_last(&self, anchor: &Processor, processor: Processor) {
        self.mutate(|chain| {
            let at = chain.iter().position(|p| p == anchor).unwrap_or(chain.len());
            chain.insert(at, processor);
        });
    }

    /// Insert `processor` after the first occurrence of `anchor`, or at the
    /// head when `anchor` is absent.
    pub fn add_after_or_first(&self, anchor: &Processor, processor: Processor) {
        self.mutate(|chain| {
            let at = chain.iter().position(|p| p == anchor).map_or(0, |i| i + 1);
            chain.insert(at, processor);
        });
    }

    /// Insert `processor` after the first occurrence of `anchor`, or at the
    /// tail when `anchor` is absent.
    pub fn add_after_or_last(&self, anchor: &Processor, processor: Processor) {
        self.mutate(|chain| {
            let at = chain
                .iter()
                .position(|p| p == anchor)
                .map_or(chain.len(), |i| i + 1);
            chain.insert(at, processor);
        });
    }

    /// Remove every occurrence of `processor`.
    pub fn remove(&self, processor: &Processor) {
        self.mutate(|chain| chain.retain(|p| p != processor));
    }

    /// Remove all processors.
    pub fn clear(&self) { self.mutate(Vec::clear); }

    /// Apply `change` to the canonical list and publish a fresh snapshot
    /// before releasing the pipeline lock.
    fn mutate(&self, change: impl FnOnce(&mut Vec<Processor>)) {
        let mut chain = self.pipeline.lock().unwrap_or_else(PoisonError::into_inner);
        change(&mut chain);
        let rebuilt: Arc<[Processor]> = Arc::from(chain.as_slice());
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = rebuilt;
    }
}

impl fmt::Debug for ProcessingSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingSettings")
            .field("kind", &self.kind)
            .field("pipeline", &self.names())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        thread,
    };

    use rstest::{fixture, rstest};

    use super::*;
    use crate::{buffer::PooledBufferProvider, processing::ProcessingState};

    fn step(name: &'static str) -> Processor {
        Processor::new(name, |_, _| ProcessingState::Success)
    }

    #[fixture]
    fn settings() -> ProcessingSettings {
        ProcessingSettings::new(
            ProcessingType::Decoding,
            Arc::new(PooledBufferProvider::new(64)),
        )
    }

    #[rstest]
    fn add_first_and_last_order(settings: ProcessingSettings) {
        settings.add_last(step("b"));
        settings.add_first(step("a"));
        settings.add_last(step("c"));
        assert_eq!(settings.names(), ["a", "b", "c"]);
    }

    #[rstest]
    fn add_first_unique_removes_prior_occurrences(settings: ProcessingSettings) {
        settings.add_last(step("x"));
        settings.add_last(step("y"));
        settings.add_last(step("x"));
        settings.add_first_unique(step("x"));
        assert_eq!(settings.names(), ["x", "y"]);
    }

    #[rstest]
    #[case::before_present("b", true, false, ["a", "n", "b"])]
    #[case::before_missing_first("z", true, false, ["n", "a", "b"])]
    #[case::before_missing_last("z", true, true, ["a", "b", "n"])]
    #[case::after_present("a", false, false, ["a", "n", "b"])]
    #[case::after_missing_first("z", false, false, ["n", "a", "b"])]
    #[case::after_missing_last("z", false, true, ["a", "b", "n"])]
    fn positional_inserts(
        settings: ProcessingSettings,
        #[case] anchor: &'static str,
        #[case] before: bool,
        #[case] fallback_last: bool,
        #[case] expected: [&str; 3],
    ) {
        settings.add_last(step("a"));
        settings.add_last(step("b"));
        let anchor = step(anchor);
        match (before, fallback_last) {
            (true, false) => settings.add_before_or_first(&anchor, step("n")),
            (true, true) => settings.add_before_or_last(&anchor, step("n")),
            (false, false) => settings.add_after_or_first(&anchor, step("n")),
            (false, true) => settings.add_after_or_last(&anchor, step("n")),
        }
        assert_eq!(settings.names(), expected);
    }

    #[rstest]
    fn remove_drops_all_occurrences(settings: ProcessingSettings) {
        for name in ["a", "b", "a", "c", "a"] {
            settings.add_last(step(name));
        }
        settings.remove(&step("a"));
        assert_eq!(settings.names(), ["b", "c"]);
        assert!(!settings.contains(&step("a")));
    }

    #[rstest]
    fn snapshot_is_unaffected_by_later_mutation(settings: ProcessingSettings) {
        settings.add_last(step("http"));
        let before = settings.snapshot();
        settings.remove(&step("http"));
        settings.add_last(step("websocket"));
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].name(), "http");
        assert_eq!(settings.names(), ["websocket"]);
    }

    /// Readers racing with writers only ever observe a complete pipeline.
    #[rstest]
    fn concurrent_readers_never_see_torn_pipeline(settings: ProcessingSettings) {
        const WIDE: [&str; 4] = ["w0", "w1", "w2", "w3"];

        // Replay one writer round on a plain list to enumerate legal states.
        let mut legal: Vec<Vec<&str>> = vec![Vec::new()];
        let mut chain: Vec<&str> = Vec::new();
        for name in WIDE {
            chain.push(name);
            legal.push(chain.clone());
        }
        chain.insert(0, "head");
        legal.push(chain.clone());
        for name in WIDE {
            chain.retain(|n| *n != name);
            legal.push(chain.clone());
        }

        let settings = Arc::new(settings);
        let done = Arc::new(AtomicBool::new(false));
        let writer = {
            let settings = Arc::clone(&settings);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                for _ in 0..2_000 {
                    for name in WIDE {
                        settings.add_last(step(name));
                    }
                    settings.add_first(step("head"));
                    for name in WIDE {
                        settings.remove(&step(name));
                    }
                    settings.remove(&step("head"));
                }
                done.store(true, Ordering::Release);
            })
        };

        while !done.load(Ordering::Acquire) {
            let names: Vec<_> = settings.snapshot().iter().map(Processor::name).collect();
            assert!(legal.contains(&names), "torn pipeline observed: {names:?}");
        }
        writer.join().expect("writer thread panicked");
        assert!(settings.is_empty());
    }

    #[test]
    fn release_all_returns_segments_to_provider() {
        let provider = Arc::new(PooledBufferProvider::new(16));
        let settings = ProcessingSettings::new(ProcessingType::Decoding, provider.clone());
        {
            let mut queues = settings.lock_pending();
            queues.push_pending(provider.acquire_segment());
            queues.deferred.push_back(provider.acquire_segment());
            assert_eq!(queues.pending_len(), 1);
            assert_eq!(queues.deferred_len(), 1);
            queues.release_all(provider.as_ref());
        }
        assert_eq!(provider.outstanding(), 0);
    }
}
