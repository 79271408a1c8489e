use serde::Serialize;
use thiserror::Error;

use super::messages::{AdminClientMessage, ClientMessage, ServerMessage};

/// Maximum inbound frame size. Anything larger is dropped before parsing.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty message")]
    EmptyMessage,
    #[error("payload too large: {0} bytes (max {MAX_MESSAGE_SIZE})")]
    PayloadTooLarge(usize),
    #[error("serialize error: {0}")]
    Serialize(String),
    #[error("deserialize error: {0}")]
    Deserialize(String),
}

fn encode<T: Serialize>(msg: &T) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(msg).map_err(|e| ProtocolError::Serialize(e.to_string()))?;
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(text.len()));
    }
    Ok(text)
}

fn check_inbound(text: &str) -> Result<(), ProtocolError> {
    if text.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(text.len()));
    }
    Ok(())
}

/// Encode a `ServerMessage` to its wire form.
pub fn encode_server_message(msg: &ServerMessage) -> Result<String, ProtocolError> {
    encode(msg)
}

/// Decode a player-channel frame.
pub fn decode_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    check_inbound(text)?;
    serde_json::from_str(text).map_err(|e| ProtocolError::Deserialize(e.to_string()))
}

/// Decode an admin-channel frame.
pub fn decode_admin_message(text: &str) -> Result<AdminClientMessage, ProtocolError> {
    check_inbound(text)?;
    serde_json::from_str(text).map_err(|e| ProtocolError::Deserialize(e.to_string()))
}

/// Decode a server frame; used by test clients.
pub fn decode_server_message(text: &str) -> Result<ServerMessage, ProtocolError> {
    check_inbound(text)?;
    serde_json::from_str(text).map_err(|e| ProtocolError::Deserialize(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::messages::{ErrorMsg, JoinRoomMsg, RevealTileMsg};

    #[test]
    fn roundtrip_client_message() {
        let msg = ClientMessage::JoinRoom(JoinRoomMsg {
            room_code: "ABC234".into(),
            player_name: "Alice".into(),
        });
        let text = serde_json::to_string(&msg).unwrap();
        let back = decode_client_message(&text).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn roundtrip_server_message() {
        let msg = ServerMessage::Error(ErrorMsg::new("not your turn"));
        let text = encode_server_message(&msg).unwrap();
        let back = decode_server_message(&text).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn empty_frame_rejected() {
        assert!(matches!(
            decode_client_message(""),
            Err(ProtocolError::EmptyMessage)
        ));
    }

    #[test]
    fn oversized_frame_rejected() {
        let huge = format!(
            r#"{{"type":"join_room","roomCode":"{}","playerName":"x"}}"#,
            "A".repeat(MAX_MESSAGE_SIZE)
        );
        assert!(matches!(
            decode_client_message(&huge),
            Err(ProtocolError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn unknown_type_rejected() {
        let result = decode_client_message(r#"{"type":"launch_missiles"}"#);
        assert!(matches!(result, Err(ProtocolError::Deserialize(_))));
    }

    #[test]
    fn server_only_type_not_a_client_message() {
        let result = decode_client_message(r#"{"type":"game_over"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn malformed_json_rejected() {
        assert!(decode_client_message("{not json").is_err());
        assert!(decode_admin_message("[]").is_err());
    }

    #[test]
    fn reveal_payload_fields() {
        let msg = ClientMessage::RevealTile(RevealTileMsg { x: -1, z: 99 });
        let text = serde_json::to_string(&msg).unwrap();
        // Out-of-range coordinates survive decoding; the engine rejects them.
        let back = decode_client_message(&text).unwrap();
        assert_eq!(back, msg);
    }
}
