//! Readiness hysteresis over the receive ring
//!
//! Playback may start only once the backlog exceeds the threshold, and stops
//! only when the backlog drains to zero. The gate reports the edges; the
//! session decides what to do with them.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::audio::buffer::SharedRingBuffer;

/// Edge notification from [`ReadinessGate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessEdge {
    BecameReady,
    BecameNotReady,
}

/// Hysteresis gate bound to one ring buffer
///
/// `on_pushed` is called by the producer, `on_popped` by the consumer. The
/// flag flips by compare-and-swap so each edge is reported once even when
/// both sides race on it.
pub struct ReadinessGate {
    buffer: SharedRingBuffer,
    threshold: usize,
    ready: AtomicBool,
}

impl ReadinessGate {
    pub fn new(buffer: SharedRingBuffer, threshold: usize) -> Self {
        Self {
            buffer,
            threshold,
            ready: AtomicBool::new(false),
        }
    }

    /// Update after a push. Reports `BecameReady` on the push that first
    /// takes the backlog above the threshold.
    pub fn on_pushed(&self) -> Option<ReadinessEdge> {
        if self.buffer.backlog() > self.threshold
            && self
                .ready
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            return Some(ReadinessEdge::BecameReady);
        }
        None
    }

    /// Update after a pop attempt. Reports `BecameNotReady` when the backlog
    /// has drained to zero.
    pub fn on_popped(&self) -> Option<ReadinessEdge> {
        if self.buffer.backlog() == 0
            && self
                .ready
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            return Some(ReadinessEdge::BecameNotReady);
        }
        None
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn has_data(&self) -> bool {
        !self.buffer.is_empty()
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn buffer(&self) -> &SharedRingBuffer {
        &self.buffer
    }
}
