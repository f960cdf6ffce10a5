//! Datagram decoder for incoming frames
//!
//! Anything that is not exactly one frame under the expected address is
//! rejected. Oversized payloads are never truncated into a slot.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::audio::buffer::Frame;
use crate::error::CodecError;
use crate::protocol::{self, BLOB_TYPE_TAG, SAMPLE_BYTES};

/// Validating decoder shared by the network receive path
pub struct FrameDecoder {
    address: String,
    frame_len: usize,
    frames_decoded: AtomicU64,
    malformed: AtomicU64,
}

impl FrameDecoder {
    pub fn new(address: impl Into<String>, frame_len: usize) -> Self {
        Self {
            address: address.into(),
            frame_len,
            frames_decoded: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
        }
    }

    /// Validate a datagram and return its raw sample bytes.
    pub fn payload<'a>(&self, datagram: &'a [u8]) -> Result<&'a [u8], CodecError> {
        let result = self.parse(datagram);
        match result {
            Ok(_) => self.frames_decoded.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.malformed.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    fn parse<'a>(&self, datagram: &'a [u8]) -> Result<&'a [u8], CodecError> {
        let (address, offset) = protocol::read_padded_str(datagram, 0)?;
        if address != self.address {
            return Err(CodecError::UnknownAddress(address.to_string()));
        }

        let (tag, offset) = protocol::read_padded_str(datagram, offset)?;
        if tag != BLOB_TYPE_TAG {
            return Err(CodecError::UnexpectedTypeTag(tag.to_string()));
        }

        let (blob, _) = protocol::read_blob(datagram, offset)?;
        let expected = self.frame_len * SAMPLE_BYTES;
        if blob.len() != expected {
            return Err(CodecError::SizeMismatch {
                expected,
                actual: blob.len(),
            });
        }
        Ok(blob)
    }

    /// Decode a datagram into a new frame
    pub fn decode(&self, datagram: &[u8]) -> Result<Frame, CodecError> {
        let mut frame = Frame::silent(self.frame_len);
        self.decode_into(datagram, frame.samples_mut())?;
        Ok(frame)
    }

    /// Decode a datagram into `dst`, which must hold at least one frame.
    pub fn decode_into(&self, datagram: &[u8], dst: &mut [f32]) -> Result<(), CodecError> {
        let payload = self.payload(datagram)?;
        for (sample, bytes) in dst.iter_mut().zip(payload.chunks_exact(SAMPLE_BYTES)) {
            *sample = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        }
        Ok(())
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

/// Decoder statistics
#[derive(Debug, Clone, Default)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub malformed: u64,
}
