//! Wire layout of audio datagrams
//!
//! Each datagram is an OSC message carrying one frame as a single blob:
//!
//! ```text
//! ┌───────────────────────┬──────────────┬──────────────┬─────────────────────────┐
//! │ address, NUL, pad to 4│ ",b\0\0"     │ blob len i32 │ N × f32 LE, pad to 4    │
//! │ e.g. "/audiostream"   │ type tag     │ big-endian   │                         │
//! └───────────────────────┴──────────────┴──────────────┴─────────────────────────┘
//! ```

use bytes::BufMut;

use crate::error::CodecError;

/// Type tag for a message with a single blob argument
pub const BLOB_TYPE_TAG: &str = ",b";

/// Size of one encoded sample
pub const SAMPLE_BYTES: usize = std::mem::size_of::<f32>();

/// Encoded size of an OSC string: contents plus NUL, rounded up to 4.
pub const fn padded_str_len(len: usize) -> usize {
    (len + 4) & !3
}

/// Encoded size of blob contents, rounded up to 4.
pub const fn padded_blob_len(len: usize) -> usize {
    (len + 3) & !3
}

/// Total datagram size for `frame_len` samples under `address`.
pub fn datagram_len(address: &str, frame_len: usize) -> usize {
    padded_str_len(address.len())
        + padded_str_len(BLOB_TYPE_TAG.len())
        + 4
        + padded_blob_len(frame_len * SAMPLE_BYTES)
}

/// Append a NUL-terminated, 4-byte aligned OSC string.
pub fn put_padded_str<B: BufMut>(buf: &mut B, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_bytes(0, padded_str_len(s.len()) - s.len());
}

/// Append a length-prefixed blob of exactly `frame_len` little-endian
/// samples, truncating or zero-padding `samples`.
pub fn put_sample_blob<B: BufMut>(buf: &mut B, samples: &[f32], frame_len: usize) {
    let byte_len = frame_len * SAMPLE_BYTES;
    buf.put_i32(byte_len as i32);
    for i in 0..frame_len {
        buf.put_f32_le(samples.get(i).copied().unwrap_or(0.0));
    }
    buf.put_bytes(0, padded_blob_len(byte_len) - byte_len);
}

/// Read an OSC string at `offset`. Returns the string and the offset just
/// past its padding.
pub fn read_padded_str(data: &[u8], offset: usize) -> Result<(&str, usize), CodecError> {
    let rest = data.get(offset..).ok_or(CodecError::Truncated(data.len()))?;
    let nul = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or(CodecError::Truncated(data.len()))?;
    let end = offset + padded_str_len(nul);
    if end > data.len() {
        return Err(CodecError::Truncated(data.len()));
    }
    let s = std::str::from_utf8(&rest[..nul])
        .map_err(|_| CodecError::UnknownAddress(String::from_utf8_lossy(&rest[..nul]).into_owned()))?;
    Ok((s, end))
}

/// Read a blob at `offset`. Returns the blob contents and the offset just
/// past its padding.
pub fn read_blob(data: &[u8], offset: usize) -> Result<(&[u8], usize), CodecError> {
    let header = data
        .get(offset..offset + 4)
        .ok_or(CodecError::Truncated(data.len()))?;
    let declared = i32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let len = usize::try_from(declared).map_err(|_| CodecError::Truncated(data.len()))?;
    let start = offset + 4;
    let blob = data
        .get(start..start + len)
        .ok_or(CodecError::Truncated(data.len()))?;
    Ok((blob, start + padded_blob_len(len)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_padding() {
        assert_eq!(padded_str_len(0), 4);
        assert_eq!(padded_str_len(2), 4);
        assert_eq!(padded_str_len(3), 4);
        assert_eq!(padded_str_len(4), 8);
        assert_eq!(padded_str_len("/audiostream".len()), 16);
        assert_eq!(padded_blob_len(0), 0);
        assert_eq!(padded_blob_len(5), 8);
    }

    #[test]
    fn test_datagram_len() {
        // 16 address + 4 tag + 4 length + 4096 samples
        assert_eq!(datagram_len("/audiostream", 1024), 4120);
    }

    #[test]
    fn test_string_layout() {
        let mut buf = BytesMut::new();
        put_padded_str(&mut buf, ",b");
        assert_eq!(&buf[..], b",b\0\0");

        let (s, next) = read_padded_str(&buf, 0).unwrap();
        assert_eq!(s, ",b");
        assert_eq!(next, 4);
    }

    #[test]
    fn test_blob_layout() {
        let mut buf = BytesMut::new();
        put_sample_blob(&mut buf, &[1.0, -0.5], 2);
        assert_eq!(&buf[..4], &[0, 0, 0, 8]);
        assert_eq!(&buf[4..8], &1.0f32.to_le_bytes());

        let (blob, next) = read_blob(&buf, 0).unwrap();
        assert_eq!(blob.len(), 8);
        assert_eq!(next, 12);
    }

    #[test]
    fn test_blob_pads_short_input() {
        let mut buf = BytesMut::new();
        put_sample_blob(&mut buf, &[0.25], 3);
        let (blob, _) = read_blob(&buf, 0).unwrap();
        assert_eq!(blob.len(), 12);
        assert_eq!(&blob[4..], &[0u8; 8]);
    }

    #[test]
    fn test_unterminated_string_is_truncated() {
        assert_eq!(
            read_padded_str(b"/audio", 0),
            Err(CodecError::Truncated(6))
        );
    }

    #[test]
    fn test_blob_longer_than_datagram_is_truncated() {
        let data = [0, 0, 1, 0, 0, 0];
        assert_eq!(read_blob(&data, 0), Err(CodecError::Truncated(6)));
    }
}
