//! Codec for encoding/decoding protocol frames

use crate::frame::Frame;
use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Serialization error: {0}")]
    SerializationError(#[from] bincode::Error),

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),
}

/// Protocol frame codec
///
/// Format: `[length: u32 BE][payload: bincode serialized frame]`, one frame
/// per datagram.
pub struct FrameCodec;

impl FrameCodec {
    /// Maximum encoded frame size. Frames travel as single UDP datagrams, so
    /// the theoretical datagram payload limit is the hard bound.
    pub const MAX_FRAME_SIZE: usize = 65_507;

    /// Encode a frame to bytes ready to hand to the socket.
    pub fn encode(frame: &Frame) -> Result<Bytes, CodecError> {
        let payload = bincode::serialize(frame)?;

        if payload.len() + 4 > Self::MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLarge(payload.len()));
        }

        let mut buf = BytesMut::with_capacity(4 + payload.len());
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&payload);

        Ok(buf.freeze())
    }

    /// Decode a frame from bytes.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded,
    /// `Ok(None)` if the buffer holds a partial frame,
    /// `Err` on error.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        if buf.len() < 4 {
            return Ok(None);
        }

        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&buf[..4]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length + 4 > Self::MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLarge(length));
        }

        if buf.len() < 4 + length {
            return Ok(None);
        }

        let _ = buf.split_to(4);
        let frame_bytes = buf.split_to(length);

        let frame: Frame = bincode::deserialize(&frame_bytes)?;

        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ConnState;

    #[test]
    fn test_encode_decode() {
        let frame = Frame::ConnectionStateResponse {
            channel: 3,
            state: ConnState::Normal,
        };

        let encoded = FrameCodec::encode(&frame).unwrap();
        let mut buf = BytesMut::from(encoded.as_ref());

        let decoded = FrameCodec::decode(&mut buf).unwrap();
        assert_eq!(decoded, Some(frame));
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn test_decode_incomplete() {
        let frame = Frame::ConnectRequest;
        let encoded = FrameCodec::encode(&frame).unwrap();

        // Only provide the length header
        let mut buf = BytesMut::from(&encoded[..4]);
        let result = FrameCodec::decode(&mut buf).unwrap();
        assert_eq!(result, None);

        // Provide the rest of the frame
        buf.extend_from_slice(&encoded[4..]);
        let result = FrameCodec::decode(&mut buf).unwrap();
        assert_eq!(result, Some(frame));
    }

    #[test]
    fn test_decode_oversized_length() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&(FrameCodec::MAX_FRAME_SIZE as u32).to_be_bytes());
        buf.extend_from_slice(&[0u8; 16]);

        assert!(matches!(
            FrameCodec::decode(&mut buf),
            Err(CodecError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_encode_oversized_payload() {
        let frame = Frame::TunnelRequest {
            channel: 1,
            seq_number: 0,
            payload: vec![0u8; FrameCodec::MAX_FRAME_SIZE],
        };

        assert!(matches!(
            FrameCodec::encode(&frame),
            Err(CodecError::FrameTooLarge(_))
        ));
    }
}
