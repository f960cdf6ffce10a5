//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod gain;
pub mod gate;
pub mod playback;

pub use buffer::{Frame, RingBuffer};
pub use capture::AudioCapture;
pub use gain::GainControl;
pub use gate::{ReadinessEdge, ReadinessGate};
pub use playback::AudioPlayback;
