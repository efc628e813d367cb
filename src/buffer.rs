//! Pooled byte segments.
//!
//! A [`Segment`] is an owned, contiguous byte range backed by [`BytesMut`].
//! Segments split without copying. Joining copies the second segment onto
//! the first and hands its storage back to the provider. Whoever holds a
//! `Segment` owns it: a segment parked
//! in a pending or deferred queue belongs to that queue until dequeued, and
//! releasing moves it back into its [`BufferProvider`].

use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::{
        Mutex,
        PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use bytes::{Bytes, BytesMut};

/// Source of receive and encode buffers for one processing direction.
pub trait BufferProvider: Send + Sync {
    /// Default capacity of buffers handed out by [`BufferProvider::acquire`].
    fn segment_capacity(&self) -> usize;

    /// Obtain an empty buffer with at least `capacity` bytes of spare room.
    fn acquire(&self, capacity: usize) -> BytesMut;

    /// Return a buffer to the provider once its bytes are no longer needed.
    fn release(&self, buffer: BytesMut);

    /// Obtain an empty segment of the default capacity.
    fn acquire_segment(&self) -> Segment { Segment::from(self.acquire(self.segment_capacity())) }

    /// Release the storage backing `segment`.
    fn release_segment(&self, segment: Segment) { self.release(segment.into_inner()); }
}

/// Contiguous owned byte range flowing through a processing pipeline.
#[derive(Default, PartialEq, Eq)]
pub struct Segment {
    data: BytesMut,
}

impl Segment {
    /// Create an empty segment.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Copy `bytes` into a new segment.
    #[must_use]
    pub fn copy_from_slice(bytes: &[u8]) -> Self { Self::from(BytesMut::from(bytes)) }

    /// Append the bytes of `other` and release its storage to `provider`.
    #[must_use]
    pub fn join(mut self, other: Segment, provider: &dyn BufferProvider) -> Segment {
        self.data.extend_from_slice(&other.data);
        provider.release_segment(other);
        self
    }

    /// Split the segment at `at`, returning the bytes from `at` onwards.
    ///
    /// `self` keeps `[0, at)`. Offsets past the end split at the end.
    #[must_use]
    pub fn split_off(&mut self, at: usize) -> Segment {
        let at = at.min(self.data.len());
        Segment::from(self.data.split_off(at))
    }

    /// Split the segment at `at`, returning the bytes before `at`.
    ///
    /// `self` keeps `[at, len)`. Offsets past the end split at the end.
    #[must_use]
    pub fn split_to(&mut self, at: usize) -> Segment {
        let at = at.min(self.data.len());
        Segment::from(self.data.split_to(at))
    }

    /// Spare capacity remaining in the backing buffer.
    #[must_use]
    pub fn remaining_capacity(&self) -> usize { self.data.capacity() - self.data.len() }

    /// Convert into an immutable, cheaply cloneable [`Bytes`].
    #[must_use]
    pub fn freeze(self) -> Bytes { self.data.freeze() }

    /// Unwrap the backing buffer.
    #[must_use]
    pub fn into_inner(self) -> BytesMut { self.data }
}

impl From<BytesMut> for Segment {
    fn from(data: BytesMut) -> Self { Self { data } }
}

impl From<&[u8]> for Segment {
    fn from(bytes: &[u8]) -> Self { Self::copy_from_slice(bytes) }
}

impl From<Vec<u8>> for Segment {
    fn from(bytes: Vec<u8>) -> Self { Self::copy_from_slice(&bytes) }
}

impl Deref for Segment {
    type Target = BytesMut;

    fn deref(&self) -> &Self::Target { &self.data }
}

impl DerefMut for Segment {
    fn deref_mut(&mut self) -> &mut Self::Target { &mut self.data }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("len", &self.data.len())
            .field("capacity", &self.data.capacity())
            .finish()
    }
}

/// Free-list backed [`BufferProvider`].
///
/// Released buffers are cleared and kept for reuse when they still hold at
/// least the default capacity and the free list has room.
pub struct PooledBufferProvider {
    segment_capacity: usize,
    max_retained: usize,
    free: Mutex<Vec<BytesMut>>,
    outstanding: AtomicUsize,
}

impl PooledBufferProvider {
    /// Create a provider handing out buffers of `segment_capacity` bytes.
    #[must_use]
    pub fn new(segment_capacity: usize) -> Self {
        Self::with_retention(segment_capacity, DEFAULT_RETAINED)
    }

    /// Create a provider that keeps at most `max_retained` free buffers.
    #[must_use]
    pub fn with_retention(segment_capacity: usize, max_retained: usize) -> Self {
        Self {
            segment_capacity: segment_capacity.max(1),
            max_retained,
            free: Mutex::new(Vec::new()),
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Buffers acquired and not yet released.
    #[must_use]
    pub fn outstanding(&self) -> usize { self.outstanding.load(Ordering::Acquire) }

    /// Buffers currently parked on the free list.
    #[must_use]
    pub fn retained(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

const DEFAULT_RETAINED: usize = 32;

impl BufferProvider for PooledBufferProvider {
    fn segment_capacity(&self) -> usize { self.segment_capacity }

    fn acquire(&self, capacity: usize) -> BytesMut {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        if capacity <= self.segment_capacity {
            let reused = self.free.lock().unwrap_or_else(PoisonError::into_inner).pop();
            if let Some(buffer) = reused {
                return buffer;
            }
        }
        BytesMut::with_capacity(capacity.max(self.segment_capacity))
    }

    fn release(&self, mut buffer: BytesMut) {
        // Saturate so foreign buffers released here cannot underflow the gauge.
        let _ = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        buffer.clear();
        if buffer.capacity() < self.segment_capacity {
            return;
        }
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < self.max_retained {
            free.push(buffer);
        }
    }
}

impl fmt::Debug for PooledBufferProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBufferProvider")
            .field("segment_capacity", &self.segment_capacity)
            .field("outstanding", &self.outstanding())
            .finish_non_exhaustive()
    }
}
