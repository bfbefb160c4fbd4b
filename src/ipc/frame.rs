//! Length-prefixed frame codec.
//!
//! Wire format, repeated: `u32 type (LE) | u32 length (LE) | payload`.

use crate::error::{Error, Result};

/// Size of the fixed frame header
pub const HEADER_LEN: usize = 8;

/// Upper bound on payload space reserved from a peer-supplied length
const MAX_PREALLOC: usize = 64 * 1024;

/// One complete message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(kind: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }
}

/// Append the encoding of one frame to `out`
pub fn encode_frame(kind: u32, payload: &[u8], out: &mut Vec<u8>) -> Result<()> {
    let length = u32::try_from(payload.len())
        .map_err(|_| Error::Ipc(format!("payload of {} bytes is too large", payload.len())))?;
    out.reserve(HEADER_LEN + payload.len());
    out.extend_from_slice(&kind.to_le_bytes());
    out.extend_from_slice(&length.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(())
}

/// Reassembles frames from arbitrarily split chunks of a byte stream.
///
/// Partial headers and partial payloads are kept until the rest arrives.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    header: [u8; HEADER_LEN],
    header_len: usize,
    /// Set once the header is complete: (kind, payload length)
    current: Option<(u32, usize)>,
    payload: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, calling `emit` for every frame they complete
    pub fn push(&mut self, mut bytes: &[u8], mut emit: impl FnMut(Frame)) {
        while !bytes.is_empty() || self.payload_complete() {
            let Some((kind, length)) = self.current else {
                let take = (HEADER_LEN - self.header_len).min(bytes.len());
                self.header[self.header_len..self.header_len + take].copy_from_slice(&bytes[..take]);
                self.header_len += take;
                bytes = &bytes[take..];
                if self.header_len == HEADER_LEN {
                    let kind = u32::from_le_bytes([self.header[0], self.header[1], self.header[2], self.header[3]]);
                    let length =
                        u32::from_le_bytes([self.header[4], self.header[5], self.header[6], self.header[7]]) as usize;
                    self.current = Some((kind, length));
                    self.header_len = 0;
                    self.payload = Vec::with_capacity(length.min(MAX_PREALLOC));
                }
                continue;
            };

            let take = (length - self.payload.len()).min(bytes.len());
            self.payload.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];
            if self.payload.len() == length {
                self.current = None;
                emit(Frame {
                    kind,
                    payload: std::mem::take(&mut self.payload),
                });
            }
        }
    }

    fn payload_complete(&self) -> bool {
        matches!(self.current, Some((_, length)) if self.payload.len() == length)
    }

    /// Whether a frame is partially received
    pub fn has_partial(&self) -> bool {
        self.header_len > 0 || self.current.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(decoder: &mut FrameDecoder, bytes: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        decoder.push(bytes, |frame| frames.push(frame));
        frames
    }

    #[test]
    fn test_encode_layout() {
        let mut out = Vec::new();
        encode_frame(1, b"hi", &mut out).unwrap();
        assert_eq!(out, vec![1, 0, 0, 0, 2, 0, 0, 0, b'h', b'i']);
    }

    #[test]
    fn test_decode_several_in_one_chunk() {
        let mut bytes = Vec::new();
        encode_frame(0, b"{}", &mut bytes).unwrap();
        encode_frame(7, b"", &mut bytes).unwrap();
        encode_frame(2, b"abc", &mut bytes).unwrap();

        let mut decoder = FrameDecoder::new();
        let frames = decode_all(&mut decoder, &bytes);
        assert_eq!(
            frames,
            vec![Frame::new(0, "{}"), Frame::new(7, ""), Frame::new(2, "abc")]
        );
        assert!(!decoder.has_partial());
    }

    #[test]
    fn test_decode_byte_by_byte() {
        let mut bytes = Vec::new();
        encode_frame(3, b"split", &mut bytes).unwrap();
        encode_frame(4, b"", &mut bytes).unwrap();

        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for byte in &bytes {
            decoder.push(std::slice::from_ref(byte), |frame| frames.push(frame));
        }
        assert_eq!(frames, vec![Frame::new(3, "split"), Frame::new(4, "")]);
    }

    #[test]
    fn test_partial_header_is_kept() {
        let mut bytes = Vec::new();
        encode_frame(9, b"xyz", &mut bytes).unwrap();

        let mut decoder = FrameDecoder::new();
        assert!(decode_all(&mut decoder, &bytes[..3]).is_empty());
        assert!(decoder.has_partial());
        assert!(decode_all(&mut decoder, &bytes[3..9]).is_empty());
        assert_eq!(decode_all(&mut decoder, &bytes[9..]), vec![Frame::new(9, "xyz")]);
    }

    #[test]
    fn test_large_declared_length_grows_with_data() {
        let mut header = Vec::new();
        header.extend_from_slice(&5u32.to_le_bytes());
        header.extend_from_slice(&u32::MAX.to_le_bytes());

        let mut decoder = FrameDecoder::new();
        assert!(decode_all(&mut decoder, &header).is_empty());
        assert!(decoder.has_partial());
        assert!(decoder.payload.capacity() < 1 << 20);

        let chunk = vec![0u8; MAX_PREALLOC * 2];
        assert!(decode_all(&mut decoder, &chunk).is_empty());
        assert_eq!(decoder.payload.len(), MAX_PREALLOC * 2);
    }
}
