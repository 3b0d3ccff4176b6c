// Peer Directory — every known or discovered remote device and its trust state
//
// Owns the peer records, the known-peer allowlist and the blocked-user set.
// Discovery, invitation and connection events all land here; the directory
// decides which devices are connectable, actionable or ignorable.

use crate::peers::types::{ConnectionState, KnownPeer, PeerRecord, USER_ID_INFO_KEY};
use crate::store::trust::TrustStore;
use crate::transport::{InviteContext, LinkState};
use anyhow::Result;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// What a connection-state event amounted to, so the caller can react
/// (trigger a history sync, notify the UI) without re-deriving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    Connecting,
    /// Transitioned into Connected; history sync should fire
    BecameConnected,
    /// An outstanding invitation was implicitly declined
    InvitationRejected,
    /// A known peer dropped to Disconnected
    Disconnected,
    /// An unknown peer's record was deleted outright
    Removed,
    /// Event referenced no record, or changed nothing
    Ignored,
}

pub struct PeerDirectory {
    peers: HashMap<String, PeerRecord>,
    known: HashMap<Uuid, KnownPeer>,
    blocked: HashSet<Uuid>,
    store: TrustStore,
}

impl PeerDirectory {
    pub fn load(store: TrustStore) -> Result<Self> {
        let known = store.load_known()?;
        let blocked = store.load_blocked()?;
        Ok(Self {
            peers: HashMap::new(),
            known,
            blocked,
            store,
        })
    }

    // ------------------------------------------------------------------
    // Discovery events
    // ------------------------------------------------------------------

    /// Record a discovery event. Returns true when observers should be told
    /// about the peer (new record, or a known device resurfacing).
    pub fn on_peer_discovered(
        &mut self,
        device_id: &str,
        display_name: &str,
        info: HashMap<String, String>,
    ) -> bool {
        if let Some(record) = self.peers.get_mut(device_id) {
            if record.state == ConnectionState::Connected {
                return false;
            }
            // A previously-known device becoming reconnectable
            if record.state == ConnectionState::Disconnected {
                record.state = ConnectionState::Discovered;
            }
            record.is_nearby = true;
            record.display_name = display_name.to_string();
            if let Some(user_id) = info.get(USER_ID_INFO_KEY).and_then(|v| v.parse().ok()) {
                record.user_id = Some(user_id);
            }
            record.discovery_info = info;
            true
        } else {
            let record =
                PeerRecord::discovered(device_id.to_string(), display_name.to_string(), info);
            self.peers.insert(device_id.to_string(), record);
            true
        }
    }

    /// Peer dropped out of discovery. Connected/connecting records are left
    /// to the connection delegate; known users degrade instead of vanishing
    /// so history and trust survive transient visibility.
    pub fn on_peer_lost(&mut self, device_id: &str) {
        let Some(record) = self.peers.get_mut(device_id) else {
            tracing::warn!(device_id, "peer lost for unknown record");
            return;
        };

        match record.state {
            ConnectionState::Connected | ConnectionState::Connecting => {}
            _ => {
                if self.is_trusted_record(device_id) {
                    let record = self.peers.get_mut(device_id).expect("checked above");
                    record.state = ConnectionState::Disconnected;
                    record.is_nearby = false;
                } else {
                    self.peers.remove(device_id);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Connection events
    // ------------------------------------------------------------------

    pub fn on_connection_changed(
        &mut self,
        device_id: &str,
        state: LinkState,
    ) -> Result<ConnectionOutcome> {
        if !self.peers.contains_key(device_id) {
            tracing::warn!(device_id, ?state, "connection event for unknown peer");
            return Ok(ConnectionOutcome::Ignored);
        }

        let outcome = match state {
            LinkState::Connecting => {
                let record = self.peers.get_mut(device_id).expect("checked above");
                record.state = ConnectionState::Connecting;
                ConnectionOutcome::Connecting
            }
            LinkState::Connected => {
                let record = self.peers.get_mut(device_id).expect("checked above");
                record.state = ConnectionState::Connected;
                record.is_nearby = true;
                let learned = record.user_id;
                let name = record.display_name.clone();
                if let Some(user_id) = learned {
                    self.remember_user(user_id, name)?;
                }
                ConnectionOutcome::BecameConnected
            }
            LinkState::NotConnected => self.on_not_connected(device_id),
        };
        Ok(outcome)
    }

    fn on_not_connected(&mut self, device_id: &str) -> ConnectionOutcome {
        let previous = self.peers.get(device_id).expect("caller checked").state;
        match previous {
            // The invitee never connected back: inferred decline
            ConnectionState::InvitationSent => {
                self.peers.get_mut(device_id).expect("present").state = ConnectionState::Rejected;
                ConnectionOutcome::InvitationRejected
            }
            ConnectionState::Connected => {
                if self.is_trusted_record(device_id) {
                    self.peers.get_mut(device_id).expect("present").state =
                        ConnectionState::Disconnected;
                    ConnectionOutcome::Disconnected
                } else {
                    self.peers.remove(device_id);
                    ConnectionOutcome::Removed
                }
            }
            // A connect attempt fizzled before a session existed
            _ => {
                let record = self.peers.get_mut(device_id).expect("present");
                if record.is_nearby {
                    record.state = ConnectionState::Discovered;
                    ConnectionOutcome::Ignored
                } else if self.is_trusted_record(device_id) {
                    self.peers.get_mut(device_id).expect("present").state =
                        ConnectionState::Disconnected;
                    ConnectionOutcome::Disconnected
                } else {
                    self.peers.remove(device_id);
                    ConnectionOutcome::Removed
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Invitation-driven transitions
    // ------------------------------------------------------------------

    /// Transition to InvitationSent. Warned no-op if the device is unknown.
    pub fn mark_invitation_sent(&mut self, device_id: &str) -> bool {
        match self.peers.get_mut(device_id) {
            Some(record) => {
                record.state = ConnectionState::InvitationSent;
                true
            }
            None => {
                tracing::warn!(device_id, "invitation-sent for unknown peer");
                false
            }
        }
    }

    /// Record an inbound invitation. Creates the record when the invitation
    /// is the first contact. An inbound invitation is proof of proximity, so
    /// the nearby flag is always set.
    pub fn mark_invitation_received(&mut self, device_id: &str, context: Option<&InviteContext>) {
        let record = self
            .peers
            .entry(device_id.to_string())
            .or_insert_with(|| {
                PeerRecord::discovered(device_id.to_string(), device_id.to_string(), HashMap::new())
            });
        record.state = ConnectionState::InvitationReceived;
        record.is_nearby = true;
        if let Some(ctx) = context {
            record.display_name = ctx.display_name.clone();
            record.user_id = Some(ctx.user_id);
        }
    }

    /// Plain state transition used by the invitation broker (accept →
    /// Connecting, decline → Discovered, retry paths).
    pub fn set_state(&mut self, device_id: &str, state: ConnectionState) {
        match self.peers.get_mut(device_id) {
            Some(record) => record.state = state,
            None => tracing::warn!(device_id, ?state, "state transition for unknown peer"),
        }
    }

    // ------------------------------------------------------------------
    // Trust: allowlist and blocked set
    // ------------------------------------------------------------------

    /// Insert or refresh the allowlist entry for a user. Sync stays off until
    /// explicitly enabled.
    pub fn remember_user(&mut self, user_id: Uuid, display_name: String) -> Result<()> {
        let entry = self.known.entry(user_id).or_insert_with(|| KnownPeer {
            user_id,
            display_name: display_name.clone(),
            sync_enabled: false,
        });
        entry.display_name = display_name;
        self.store.save_known(entry)?;
        Ok(())
    }

    /// Drop a user from the allowlist. Matching records demote to Discovered
    /// when still nearby, otherwise disappear. Future connections stay
    /// possible; this is not a block.
    pub fn forget(&mut self, user_id: Uuid) -> Result<()> {
        if self.known.remove(&user_id).is_some() {
            self.store.remove_known(&user_id)?;
        }
        let matching: Vec<String> = self
            .peers
            .values()
            .filter(|r| r.user_id == Some(user_id))
            .map(|r| r.device_id.clone())
            .collect();
        for device_id in matching {
            let record = self.peers.get_mut(&device_id).expect("collected above");
            if record.is_nearby {
                record.state = ConnectionState::Discovered;
            } else {
                self.peers.remove(&device_id);
            }
        }
        Ok(())
    }

    /// Add a user to the blocked set. Existing sessions are left alone; every
    /// future invitation and auto-connect for this user is refused.
    pub fn block(&mut self, user_id: Uuid) -> Result<()> {
        if self.blocked.insert(user_id) {
            self.store.add_blocked(&user_id)?;
        }
        Ok(())
    }

    pub fn set_sync_enabled(&mut self, user_id: Uuid, enabled: bool) -> Result<bool> {
        match self.known.get_mut(&user_id) {
            Some(entry) => {
                entry.sync_enabled = enabled;
                self.store.save_known(entry)?;
                Ok(true)
            }
            None => {
                tracing::warn!(%user_id, "sync toggle for unknown user");
                Ok(false)
            }
        }
    }

    pub fn is_blocked(&self, user_id: &Uuid) -> bool {
        self.blocked.contains(user_id)
    }

    pub fn is_known(&self, user_id: &Uuid) -> bool {
        self.known.contains_key(user_id)
    }

    pub fn is_sync_enabled(&self, user_id: &Uuid) -> bool {
        self.known
            .get(user_id)
            .map(|k| k.sync_enabled)
            .unwrap_or(false)
    }

    fn is_trusted_record(&self, device_id: &str) -> bool {
        self.peers
            .get(device_id)
            .and_then(|r| r.user_id)
            .map(|u| self.is_known(&u))
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    pub fn get(&self, device_id: &str) -> Option<&PeerRecord> {
        self.peers.get(device_id)
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }

    pub fn known_peers(&self) -> impl Iterator<Item = &KnownPeer> {
        self.known.values()
    }

    pub fn blocked_users(&self) -> impl Iterator<Item = &Uuid> {
        self.blocked.iter()
    }

    pub fn connected_device_ids(&self) -> Vec<String> {
        self.peers
            .values()
            .filter(|r| r.state == ConnectionState::Connected)
            .map(|r| r.device_id.clone())
            .collect()
    }

    /// Connected devices belonging to one logical user.
    pub fn connected_devices_of(&self, user_id: Uuid) -> Vec<String> {
        self.peers
            .values()
            .filter(|r| r.state == ConnectionState::Connected && r.user_id == Some(user_id))
            .map(|r| r.device_id.clone())
            .collect()
    }
}
