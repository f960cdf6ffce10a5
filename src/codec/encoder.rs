//! Datagram encoder for outgoing frames

use bytes::BytesMut;

use crate::protocol::{self, BLOB_TYPE_TAG};

/// Encodes frames into datagrams tagged with the stream address.
///
/// The output buffer is sized for one datagram up front and reused, so
/// encoding does not allocate.
pub struct FrameEncoder {
    address: String,
    frame_len: usize,
    /// Encoding buffer (reused to avoid allocations)
    encode_buffer: BytesMut,
    frames_encoded: u64,
    bytes_produced: u64,
}

impl FrameEncoder {
    pub fn new(address: impl Into<String>, frame_len: usize) -> Self {
        let address = address.into();
        let encode_buffer = BytesMut::with_capacity(protocol::datagram_len(&address, frame_len));
        Self {
            address,
            frame_len,
            encode_buffer,
            frames_encoded: 0,
            bytes_produced: 0,
        }
    }

    /// Encode one frame. `samples` is truncated or zero-padded to the frame
    /// length. The returned slice is valid until the next call.
    pub fn encode(&mut self, samples: &[f32]) -> &[u8] {
        self.encode_buffer.clear();
        protocol::put_padded_str(&mut self.encode_buffer, &self.address);
        protocol::put_padded_str(&mut self.encode_buffer, BLOB_TYPE_TAG);
        protocol::put_sample_blob(&mut self.encode_buffer, samples, self.frame_len);

        self.frames_encoded += 1;
        self.bytes_produced += self.encode_buffer.len() as u64;
        &self.encode_buffer
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Size of every datagram this encoder produces
    pub fn datagram_len(&self) -> usize {
        protocol::datagram_len(&self.address, self.frame_len)
    }

    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
        }
    }
}

/// Encoder statistics
#[derive(Debug, Clone, Default)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
}
