//! Codec for encoding/decoding tunnel messages
//!
//! The underlying stream preserves message boundaries, so one encoded
//! message is exactly one frame and no length prefix is added here.

use crate::messages::Message;
use crate::MAX_MESSAGE_SIZE;
use bytes::Bytes;
use thiserror::Error;

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Serialization error: {0}")]
    SerializationError(#[from] bincode::Error),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("Empty frame")]
    EmptyFrame,
}

/// Tunnel message codec
pub struct TunnelCodec;

impl TunnelCodec {
    /// Encode a message into a single frame
    pub fn encode(msg: &Message) -> Result<Bytes, CodecError> {
        let frame = bincode::serialize(msg)?;

        if frame.len() > MAX_MESSAGE_SIZE {
            return Err(CodecError::MessageTooLarge(frame.len()));
        }

        Ok(Bytes::from(frame))
    }

    /// Decode a single frame into a message
    pub fn decode(frame: &[u8]) -> Result<Message, CodecError> {
        if frame.is_empty() {
            return Err(CodecError::EmptyFrame);
        }
        if frame.len() > MAX_MESSAGE_SIZE {
            return Err(CodecError::MessageTooLarge(frame.len()));
        }

        Ok(bincode::deserialize(frame)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConnId, Control, ControlCode, IpProtocol};

    fn id() -> ConnId {
        ConnId::new(
            IpProtocol::Udp,
            "10.0.0.1:5000".parse().unwrap(),
            "10.0.0.2:53".parse().unwrap(),
        )
    }

    #[test]
    fn test_encode_decode() {
        let msg = Message::data(id(), Bytes::from_static(b"hello world"));

        let encoded = TunnelCodec::encode(&msg).unwrap();
        let decoded = TunnelCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_sync_control_keeps_ack() {
        let msg = Message::from(Control::sync_request(42));

        let encoded = TunnelCodec::encode(&msg).unwrap();
        let decoded = TunnelCodec::decode(&encoded).unwrap();
        let ctrl = decoded.as_control().unwrap();
        assert_eq!(ctrl.code(), ControlCode::SyncRequest { ack: 42 });
        assert_eq!(ctrl.ack_number(), Some(42));
    }

    #[test]
    fn test_decode_empty_frame() {
        assert!(matches!(
            TunnelCodec::decode(&[]),
            Err(CodecError::EmptyFrame)
        ));
    }

    #[test]
    fn test_decode_garbage() {
        let result = TunnelCodec::decode(&[0xff, 0xff, 0xff, 0xff, 0x01]);
        assert!(matches!(result, Err(CodecError::SerializationError(_))));
    }

    #[test]
    fn test_encode_too_large() {
        let msg = Message::data(id(), vec![0u8; MAX_MESSAGE_SIZE + 1]);
        assert!(matches!(
            TunnelCodec::encode(&msg),
            Err(CodecError::MessageTooLarge(_))
        ));
    }
}
