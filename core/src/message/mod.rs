// Message module — chat entries and the wire codec

pub mod codec;
pub mod types;

pub use codec::{decode_payload, encode_payload, WirePayload};
pub use types::{now_millis, ChatMessage};
