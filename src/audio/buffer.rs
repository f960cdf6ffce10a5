//! Lock-free frame ring for the receive path
//!
//! This implements a single-producer single-consumer (SPSC) ring of
//! fixed-size frames. The network thread pushes, the audio callback pops.
//! Slots are preallocated at construction so neither side allocates.

use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Fixed-length block of mono audio samples
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    samples: Box<[f32]>,
}

impl Frame {
    /// All-zero frame of `len` samples
    pub fn silent(len: usize) -> Self {
        Self {
            samples: vec![0.0; len].into_boxed_slice(),
        }
    }

    /// Build a frame of exactly `len` samples from `src`, truncating or
    /// zero-padding as needed.
    pub fn from_slice(src: &[f32], len: usize) -> Self {
        let mut frame = Self::silent(len);
        let n = src.len().min(len);
        frame.samples[..n].copy_from_slice(&src[..n]);
        frame
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }
}

impl From<Vec<f32>> for Frame {
    fn from(samples: Vec<f32>) -> Self {
        Self {
            samples: samples.into_boxed_slice(),
        }
    }
}

/// Lock-free SPSC ring of audio frames with drop-oldest overflow
///
/// Cursors increase monotonically and are never reset; the slot for a cursor
/// is `cursor & mask`. `write - read` is the backlog and never exceeds the
/// capacity: a push into a full ring first claims the oldest unread slot by
/// advancing `read`.
///
/// The consumer copies a slot and only then claims it with a compare-and-swap
/// on `read`. If the producer overwrote that slot in the meantime, its own
/// compare-and-swap on `read` came first, the consumer's fails, and the copy
/// is discarded and retried.
pub struct RingBuffer {
    /// `capacity * frame_len` samples stored as `f32` bit patterns
    slots: Box<[AtomicU32]>,
    frame_len: usize,
    capacity: usize,
    mask: usize,
    write: CachePadded<AtomicUsize>,
    read: CachePadded<AtomicUsize>,
    overwritten: AtomicU64,
    empty_pops: AtomicU64,
}

impl RingBuffer {
    /// Create a ring of at least `capacity` frames of `frame_len` samples.
    /// The capacity is rounded up to a power of two.
    pub fn new(capacity: usize, frame_len: usize) -> Self {
        assert!(frame_len > 0, "Frame length must be non-zero");

        let capacity = capacity.max(1).next_power_of_two();
        let slots = (0..capacity * frame_len)
            .map(|_| AtomicU32::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            frame_len,
            capacity,
            mask: capacity - 1,
            write: CachePadded::new(AtomicUsize::new(0)),
            read: CachePadded::new(AtomicUsize::new(0)),
            overwritten: AtomicU64::new(0),
            empty_pops: AtomicU64::new(0),
        }
    }

    fn slot(&self, cursor: usize) -> &[AtomicU32] {
        let base = (cursor & self.mask) * self.frame_len;
        &self.slots[base..base + self.frame_len]
    }

    /// Push a frame. Never blocks and never fails.
    ///
    /// `samples` is truncated or zero-padded to the frame length. If the ring
    /// is full the oldest unread frame is overwritten. Producer side only.
    pub fn push(&self, samples: &[f32]) {
        let w = self.write.load(Ordering::Relaxed);
        let mut r = self.read.load(Ordering::Acquire);

        while w.wrapping_sub(r) >= self.capacity {
            match self.read.compare_exchange_weak(
                r,
                r.wrapping_add(1),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.overwritten.fetch_add(1, Ordering::Relaxed);
                    break;
                }
                Err(actual) => r = actual,
            }
        }

        for (i, cell) in self.slot(w).iter().enumerate() {
            let value = samples.get(i).copied().unwrap_or(0.0);
            cell.store(value.to_bits(), Ordering::Relaxed);
        }

        self.write.store(w.wrapping_add(1), Ordering::Release);
    }

    /// Push a whole frame. Producer side only.
    pub fn push_frame(&self, frame: &Frame) {
        self.push(frame.samples());
    }

    /// Pop the oldest frame into `dst` without allocating.
    ///
    /// Copies `min(dst.len(), frame_len)` samples and zero-fills any excess in
    /// `dst`. Returns false, leaving `dst` untouched, when the ring is empty.
    /// Consumer side only.
    pub fn pop_into(&self, dst: &mut [f32]) -> bool {
        loop {
            let r = self.read.load(Ordering::Acquire);
            let w = self.write.load(Ordering::Acquire);
            if r == w {
                self.empty_pops.fetch_add(1, Ordering::Relaxed);
                return false;
            }

            let n = dst.len().min(self.frame_len);
            for (d, cell) in dst[..n].iter_mut().zip(self.slot(r)) {
                *d = f32::from_bits(cell.load(Ordering::Relaxed));
            }

            if self
                .read
                .compare_exchange(r, r.wrapping_add(1), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                dst[n..].fill(0.0);
                return true;
            }
            // Producer overwrote this slot mid-copy; retry from the new head.
        }
    }

    /// Pop the oldest frame. Allocates; the audio path uses [`Self::pop_into`].
    pub fn pop(&self) -> Option<Frame> {
        let mut frame = Frame::silent(self.frame_len);
        self.pop_into(frame.samples_mut()).then_some(frame)
    }

    /// Frames written but not yet read
    pub fn backlog(&self) -> usize {
        let r = self.read.load(Ordering::Acquire);
        let w = self.write.load(Ordering::Acquire);
        w.wrapping_sub(r).min(self.capacity)
    }

    pub fn is_empty(&self) -> bool {
        self.backlog() == 0
    }

    pub fn is_full(&self) -> bool {
        self.backlog() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Frames lost to drop-oldest overflow
    pub fn overwritten_count(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }

    /// Pops that found the ring empty
    pub fn empty_pop_count(&self) -> u64 {
        self.empty_pops.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a ring buffer
pub type SharedRingBuffer = Arc<RingBuffer>;

/// Create a new shared ring buffer
pub fn create_shared_buffer(capacity: usize, frame_len: usize) -> SharedRingBuffer {
    Arc::new(RingBuffer::new(capacity, frame_len))
}
