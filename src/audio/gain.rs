//! Linear percentage gain
//!
//! [`apply`] is the pure gain stage. [`GainControl`] carries the current
//! percentage from the control surface to the audio callback without locks.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::audio::buffer::Frame;

/// Scale every sample of `frame` by `percent / 100`.
///
/// No clipping and no range check; keeping `percent` in [0, 100] is the
/// caller's job.
pub fn apply(frame: &Frame, percent: f32) -> Frame {
    let mut out = frame.clone();
    apply_in_place(out.samples_mut(), percent);
    out
}

/// In-place variant of [`apply`] for the audio callback.
#[inline]
pub fn apply_in_place(samples: &mut [f32], percent: f32) {
    let scale = percent / 100.0;
    for sample in samples.iter_mut() {
        *sample *= scale;
    }
}

/// Scale `src` into `dst` sample by sample.
#[inline]
pub fn apply_into(src: &[f32], dst: &mut [f32], percent: f32) {
    let scale = percent / 100.0;
    for (d, s) in dst.iter_mut().zip(src) {
        *d = s * scale;
    }
}

/// Shared gain setting, stored as `f32` bits.
///
/// Cloning is cheap (single `Arc` increment); every clone sees the same value.
#[derive(Clone)]
pub struct GainControl {
    percent_bits: Arc<AtomicU32>,
}

impl GainControl {
    pub const MIN_PERCENT: f32 = 0.0;
    pub const MAX_PERCENT: f32 = 100.0;

    pub fn new(percent: f32) -> Self {
        let control = Self {
            percent_bits: Arc::new(AtomicU32::new(Self::MAX_PERCENT.to_bits())),
        };
        control.set_percent(percent);
        control
    }

    /// Set the gain, clamped to [0, 100]. NaN is treated as 0.
    pub fn set_percent(&self, percent: f32) {
        let clamped = if percent.is_nan() {
            Self::MIN_PERCENT
        } else {
            percent.clamp(Self::MIN_PERCENT, Self::MAX_PERCENT)
        };
        self.percent_bits.store(clamped.to_bits(), Ordering::Relaxed);
    }

    pub fn percent(&self) -> f32 {
        f32::from_bits(self.percent_bits.load(Ordering::Relaxed))
    }
}

impl Default for GainControl {
    fn default() -> Self {
        Self::new(Self::MAX_PERCENT)
    }
}

impl std::fmt::Debug for GainControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GainControl")
            .field("percent", &self.percent())
            .finish()
    }
}
