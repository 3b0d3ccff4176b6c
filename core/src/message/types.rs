// Chat message types — the unit the whole sync protocol reasons about

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One entry in the chat history.
///
/// Immutable once created. Identity is the `id`; display/merge order is the
/// `timestamp` (ties broken by insertion order, see `MessageStore`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique message ID (UUID v4)
    pub id: Uuid,
    /// Logical user who authored the message
    pub sender_user_id: Uuid,
    /// Display name of the author at send time
    pub sender_name: String,
    /// UTF-8 message body
    pub content: String,
    /// System/informational entry — local UI event, never chat content.
    /// Excluded from conflict detection; dropped when merging a remote
    /// history; retained when adopting one.
    pub is_system: bool,
    /// Unix timestamp, milliseconds
    pub timestamp: u64,
}

impl ChatMessage {
    /// Create a user-authored chat message
    pub fn user(sender_user_id: Uuid, sender_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender_user_id,
            sender_name: sender_name.into(),
            content: content.into(),
            is_system: false,
            timestamp: now_millis(),
        }
    }

    /// Create a local system/informational entry
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender_user_id: Uuid::nil(),
            sender_name: String::new(),
            content: content.into(),
            is_system: true,
            timestamp: now_millis(),
        }
    }
}

pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
