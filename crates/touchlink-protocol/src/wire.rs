//! Wire format: length-prefixed bincode v2 frames.
//!
//! Each message on the wire is:
//!   [4 bytes big-endian length][bincode v2 payload]
//!
//! The prefix makes the stream self-delimiting: a receiver always knows where
//! one message ends and the next begins without external metadata.

use bincode::{Decode, Encode};

use crate::error::ProtocolError;

/// Maximum message size (64 KiB). Far above any real touch batch; rejected
/// before allocation.
pub const MAX_MESSAGE_SIZE: u32 = 64 * 1024;

/// Encode a message to a length-prefixed byte vector.
pub fn encode_message<T: Encode>(msg: &T) -> Result<Vec<u8>, ProtocolError> {
    let config = bincode::config::standard();
    let payload = bincode::encode_to_vec(msg, config)
        .map_err(|e| ProtocolError::Serialization(e.to_string()))?;

    let len = u32::try_from(payload.len())
        .map_err(|_| ProtocolError::Serialization("message too large".to_string()))?;

    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::Serialization(format!(
            "message size {len} exceeds maximum {MAX_MESSAGE_SIZE}"
        )));
    }

    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decode a message from a bincode v2 payload (without the length prefix).
pub fn decode_message<T: Decode<()>>(payload: &[u8]) -> Result<T, ProtocolError> {
    let config = bincode::config::standard();
    let (msg, _) = bincode::decode_from_slice(payload, config)
        .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use touchlink_types::{Heartbeat, PadMessage, CONTROL_TOKEN};

    #[test]
    fn control_request_frame_roundtrip() {
        let msg = PadMessage::ControlRequest {
            token: CONTROL_TOKEN.to_string(),
            device_name: "handheld".to_string(),
        };

        let bytes = encode_message(&msg).unwrap();
        let len = u32::from_be_bytes(bytes[..4].try_into().unwrap());
        assert_eq!(len as usize, bytes.len() - 4);

        let decoded: PadMessage = decode_message(&bytes[4..]).unwrap();
        match decoded {
            PadMessage::ControlRequest { token, device_name } => {
                assert_eq!(token, CONTROL_TOKEN);
                assert_eq!(device_name, "handheld");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn heartbeat_frame_roundtrip() {
        let ping = Heartbeat::ping(12345, 99);
        let bytes = encode_message(&PadMessage::Heartbeat(ping)).unwrap();
        let decoded: PadMessage = decode_message(&bytes[4..]).unwrap();
        match decoded {
            PadMessage::Heartbeat(hb) => {
                assert_eq!(hb.seq, 12345);
                assert_eq!(hb.cookie, ping.cookie);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
