// Wire payload codec — tagged encoding with size limits
//
// Every byte blob delivered by the transport decodes to exactly one
// WirePayload kind. Undecodable bytes fall back to a best-effort chat
// interpretation; total failure is reported to the caller, never a panic.

use super::types::ChatMessage;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum encoded payload size: 1 MB (a full history push can carry many
/// messages, individual chat payloads are far smaller).
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Maximum chat message body: 64 KB
pub const MAX_CONTENT_SIZE: usize = 64 * 1024;

/// Everything that can cross the peer-to-peer data channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WirePayload {
    /// A single chat message
    Chat(ChatMessage),
    /// Full-state history push, sent on every transition to connected
    Sync(Vec<ChatMessage>),
    /// Conflict resolution decision. Local-centric: `use_remote = true`
    /// means "the sender adopted the receiver's history".
    SyncDecision { use_remote: bool },
    /// The sender forgot this user; the receiver drops the sender's user
    /// from its own allowlist.
    ForgetDevice { user_id: Uuid },
}

/// Serialize a payload to wire bytes.
pub fn encode_payload(payload: &WirePayload) -> Result<Vec<u8>> {
    if let WirePayload::Chat(msg) = payload {
        if msg.content.len() > MAX_CONTENT_SIZE {
            bail!(
                "chat content too large: {} bytes (max {})",
                msg.content.len(),
                MAX_CONTENT_SIZE
            );
        }
    }

    let bytes = bincode::serialize(payload)?;
    if bytes.len() > MAX_PAYLOAD_SIZE {
        bail!(
            "encoded payload too large: {} bytes (max {})",
            bytes.len(),
            MAX_PAYLOAD_SIZE
        );
    }
    Ok(bytes)
}

/// Decode wire bytes into a payload.
///
/// Fallback ladder: tagged payload first, then plain UTF-8 text treated as a
/// chat message from the given peer (best-effort interop), then error. The
/// caller turns the error into a local "unreadable message" system note.
pub fn decode_payload(bytes: &[u8], sender_user_id: Uuid, sender_name: &str) -> Result<WirePayload> {
    if bytes.len() > MAX_PAYLOAD_SIZE {
        bail!(
            "payload too large: {} bytes (max {})",
            bytes.len(),
            MAX_PAYLOAD_SIZE
        );
    }

    if let Ok(payload) = bincode::deserialize::<WirePayload>(bytes) {
        return Ok(payload);
    }

    match std::str::from_utf8(bytes) {
        Ok(text) if !text.trim().is_empty() => Ok(WirePayload::Chat(ChatMessage::user(
            sender_user_id,
            sender_name,
            text,
        ))),
        _ => bail!("undecodable payload ({} bytes)", bytes.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_roundtrip() {
        let msg = ChatMessage::user(Uuid::new_v4(), "alice", "hello");
        let bytes = encode_payload(&WirePayload::Chat(msg.clone())).unwrap();
        match decode_payload(&bytes, Uuid::nil(), "x").unwrap() {
            WirePayload::Chat(restored) => assert_eq!(restored, msg),
            other => panic!("wrong kind: {:?}", other),
        }
    }

    #[test]
    fn test_sync_roundtrip() {
        let history = vec![
            ChatMessage::user(Uuid::new_v4(), "a", "one"),
            ChatMessage::system("note"),
        ];
        let bytes = encode_payload(&WirePayload::Sync(history.clone())).unwrap();
        match decode_payload(&bytes, Uuid::nil(), "x").unwrap() {
            WirePayload::Sync(restored) => assert_eq!(restored, history),
            other => panic!("wrong kind: {:?}", other),
        }
    }

    #[test]
    fn test_decision_roundtrip() {
        let bytes = encode_payload(&WirePayload::SyncDecision { use_remote: false }).unwrap();
        match decode_payload(&bytes, Uuid::nil(), "x").unwrap() {
            WirePayload::SyncDecision { use_remote } => assert!(!use_remote),
            other => panic!("wrong kind: {:?}", other),
        }
    }

    #[test]
    fn test_plain_text_falls_back_to_chat() {
        let sender = Uuid::new_v4();
        match decode_payload(b"raw text from an old client", sender, "legacy").unwrap() {
            WirePayload::Chat(msg) => {
                assert_eq!(msg.content, "raw text from an old client");
                assert_eq!(msg.sender_user_id, sender);
                assert!(!msg.is_system);
            }
            other => panic!("wrong kind: {:?}", other),
        }
    }

    #[test]
    fn test_garbage_is_an_error() {
        // Invalid UTF-8 that is also not a valid tagged payload
        let result = decode_payload(&[0xff, 0xfe, 0xfd], Uuid::nil(), "x");
        assert!(result.is_err());
    }

    #[test]
    fn test_reject_oversized_content() {
        let mut msg = ChatMessage::user(Uuid::new_v4(), "a", "");
        msg.content = "x".repeat(MAX_CONTENT_SIZE + 1);
        assert!(encode_payload(&WirePayload::Chat(msg)).is_err());
    }

    #[test]
    fn test_reject_oversized_decode() {
        let big = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        assert!(decode_payload(&big, Uuid::nil(), "x").is_err());
    }
}
