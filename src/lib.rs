//! # LAN Audio Link
//!
//! Point-to-point live audio streaming over UDP.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────── SENDER ────────────────────────────┐
//! │  ┌─────────────┐   per period   ┌──────────────────────────┐   │
//! │  │ Input device│ ─────────────▶ │ StreamSession (Sending)  │   │
//! │  │ (cpal)      │                │  GainStage → FrameEncoder│   │
//! │  └─────────────┘                └────────────┬─────────────┘   │
//! │                                              │ Transport.send  │
//! └──────────────────────────────────────────────┼─────────────────┘
//!                                                │ UDP: one frame per datagram
//!                                                │ [/audiostream|,b|len|f32 LE…]
//! ┌──────────────────────────── RECEIVER ────────┼─────────────────┐
//! │                                              ▼                 │
//! │  network thread ──▶ FrameDecoder ──▶ RingBuffer (SPSC) ──┐     │
//! │                                        │                 │     │
//! │                                  ReadinessGate           │ pop │
//! │                                  (edges drive FSM)       ▼     │
//! │  ┌──────────────┐   per period   ┌──────────────────────────┐  │
//! │  │Output device │ ◀───────────── │ StreamSession (Receiving)│  │
//! │  │ (cpal)       │                │  GainStage               │  │
//! │  └──────────────┘                └──────────────────────────┘  │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The ring buffer is the only structure shared between the network thread
//! and the audio callback. Neither side takes a lock on it.

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod session;

pub use error::{Error, Result};
pub use session::{SessionEvent, SessionState, StreamSession};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Samples per frame, and therefore per datagram
    pub const DEFAULT_FRAME_SIZE: usize = 1024;

    /// Default UDP port for audio streaming
    pub const DEFAULT_UDP_PORT: u16 = 1234;

    /// Default sender target host
    pub const DEFAULT_HOST: &str = "127.0.0.1";

    /// Ring buffer capacity (in frames)
    pub const RING_BUFFER_CAPACITY: usize = 1024;

    /// Backlog that must be exceeded before playback starts
    pub const DEFAULT_READY_THRESHOLD: usize = 3;

    /// Address pattern tagging audio datagrams
    pub const AUDIO_STREAM_ADDRESS: &str = "/audiostream";

    /// Largest datagram the UDP receive loop accepts
    pub const MAX_DATAGRAM_SIZE: usize = 65_507;

    /// Capacity of the session event channel
    pub const EVENT_CHANNEL_CAPACITY: usize = 64;
}
