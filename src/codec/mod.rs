//! Frame ⇄ datagram codec
//!
//! Turns fixed-size frames into tagged datagrams for the wire and back.
//! No compression: samples travel as raw little-endian `f32`.

pub mod decoder;
pub mod encoder;

pub use decoder::FrameDecoder;
pub use encoder::FrameEncoder;
