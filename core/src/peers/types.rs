// Peer record types and the connection-state machine

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Where a peer sits in its connection lifecycle.
///
/// Causal order: `Discovered → InvitationSent|InvitationReceived →
/// Connecting → Connected → Disconnected|Rejected`, with `Disconnected` and
/// `Rejected` allowed back to `Discovered`/`InvitationSent` for a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Discovered,
    InvitationSent,
    InvitationReceived,
    Connecting,
    Connected,
    Disconnected,
    Rejected,
}

impl ConnectionState {
    /// States from which the local user may initiate a connection attempt.
    pub fn is_user_actionable(self) -> bool {
        matches!(
            self,
            ConnectionState::Discovered | ConnectionState::InvitationReceived
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Discovered => "discovered",
            ConnectionState::InvitationSent => "invitation sent",
            ConnectionState::InvitationReceived => "invitation received",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Rejected => "rejected",
        };
        write!(f, "{label}")
    }
}

/// One known or discovered remote device.
///
/// `state` and `is_nearby` are orthogonal: a disconnected peer can still be
/// broadcasting discovery, and an inbound invitation proves proximity even
/// without a discovery event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRecord {
    pub device_id: String,
    pub display_name: String,
    pub state: ConnectionState,
    pub is_nearby: bool,
    /// Logical user, once learned from advertised metadata or an invitation
    pub user_id: Option<Uuid>,
    /// Last discovery metadata, refreshed on every discovery event
    pub discovery_info: HashMap<String, String>,
}

impl PeerRecord {
    pub fn discovered(
        device_id: String,
        display_name: String,
        discovery_info: HashMap<String, String>,
    ) -> Self {
        let user_id = discovery_info
            .get(USER_ID_INFO_KEY)
            .and_then(|v| v.parse().ok());
        Self {
            device_id,
            display_name,
            state: ConnectionState::Discovered,
            is_nearby: true,
            user_id,
            discovery_info,
        }
    }
}

/// Discovery-info key under which peers advertise their logical user id.
pub const USER_ID_INFO_KEY: &str = "user_id";

/// Persisted allowlist entry for a logical user (possibly several devices).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownPeer {
    pub user_id: Uuid,
    pub display_name: String,
    /// Authorizes automatic history merging and invitation auto-accept
    pub sync_enabled: bool,
}
