// Peers module — directory, records and the connection-state machine

pub mod directory;
pub mod types;

pub use directory::{ConnectionOutcome, PeerDirectory};
pub use types::{ConnectionState, KnownPeer, PeerRecord, USER_ID_INFO_KEY};
