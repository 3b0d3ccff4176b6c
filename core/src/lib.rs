// Tincan Core — nearby chat spine
//
// Peer trust decisions and history reconciliation live here; moving bytes
// between devices is the platform transport's problem.

pub mod identity;
pub mod invite;
pub mod message;
pub mod peers;
pub mod store;
pub mod sync;
pub mod transport;

use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

pub use identity::{IdentityManager, IdentityStore, LocalIdentity};
pub use invite::{DeclineReason, InvitationBroker, InviteOutcome};
pub use message::{ChatMessage, WirePayload};
pub use peers::{ConnectionOutcome, ConnectionState, KnownPeer, PeerDirectory, PeerRecord};
pub use sync::{PendingSync, SyncCoordinator, SyncOutcome};
pub use transport::{InviteContext, LinkEvent, LinkState, Transport, TransportError};

use invite::InvitationBroker as Broker;
use message::{decode_payload, encode_payload};
use peers::USER_ID_INFO_KEY;
use store::{MemoryStorage, MessageStore, SledStorage, StorageBackend, TrustStore};

const INVITE_TIMEOUT_SECS: u32 = 30;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error)]
pub enum TincanError {
    #[error("Storage error")]
    Storage,
    #[error("Invalid input")]
    InvalidInput,
    #[error("Internal error")]
    Internal,
}

impl From<anyhow::Error> for TincanError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("internal error: {err:#}");
        TincanError::Internal
    }
}

// ============================================================================
// SNAPSHOTS & DELEGATE
// ============================================================================

/// Read-only identity projection for observers.
#[derive(Debug, Clone)]
pub struct IdentityInfo {
    pub device_id: String,
    pub user_id: Uuid,
    pub display_name: String,
}

/// Read-only peer projection: the record plus derived trust flags.
#[derive(Debug, Clone)]
pub struct PeerSnapshot {
    pub device_id: String,
    pub display_name: String,
    pub state: ConnectionState,
    pub is_nearby: bool,
    pub user_id: Option<Uuid>,
    pub sync_enabled: bool,
}

/// Callback interface for UI-facing events. Observers read snapshots; they
/// mutate core state only through the command methods.
pub trait ChatDelegate: Send + Sync {
    /// A peer appeared (or resurfaced) in discovery
    fn on_peer_discovered(&self, device_id: String, display_name: String) {
        let _ = (device_id, display_name);
    }
    /// A peer's connection state changed
    fn on_connection_changed(&self, device_id: String, state: ConnectionState) {
        let _ = (device_id, state);
    }
    /// An inbound invitation needs an accept/decline decision
    fn on_invitation_requested(&self, device_id: String, display_name: String) {
        let _ = (device_id, display_name);
    }
    /// A new chat message landed in the history
    fn on_message_received(&self, message: ChatMessage) {
        let _ = message;
    }
    /// A history conflict needs a keep-local / use-remote decision
    fn on_sync_conflict(&self, device_id: String, display_name: String) {
        let _ = (device_id, display_name);
    }
}

// ============================================================================
// CORE
// ============================================================================

/// All mutable state behind one lock — transport events and UI commands are
/// serialized through it, never interleaved. The invariants (one pending
/// sync per peer, exactly-once invitation resolution) rely on that.
struct CoreState {
    identity: IdentityManager,
    directory: PeerDirectory,
    messages: MessageStore,
    sync: SyncCoordinator,
    broker: Broker,
    is_hosting: bool,
    is_browsing: bool,
}

#[derive(Clone)]
pub struct Tincan {
    state: Arc<RwLock<CoreState>>,
    transport: Arc<dyn Transport>,
    delegate: Arc<RwLock<Option<Arc<dyn ChatDelegate>>>>,
}

impl Tincan {
    /// In-memory core, nothing persisted. Tests and throwaway sessions.
    pub fn new(transport: Arc<dyn Transport>, display_name: &str) -> Result<Self, TincanError> {
        Self::init(transport, Arc::new(MemoryStorage::new()), display_name)
    }

    /// Core persisted under `storage_path` (sled).
    pub fn with_storage(
        transport: Arc<dyn Transport>,
        storage_path: &str,
        display_name: &str,
    ) -> Result<Self, TincanError> {
        std::fs::create_dir_all(Path::new(storage_path)).map_err(|_| TincanError::Storage)?;
        let backend = SledStorage::open(storage_path).map_err(|e| {
            tracing::error!("failed to open storage at {storage_path}: {e}");
            TincanError::Storage
        })?;
        Self::init(transport, Arc::new(backend), display_name)
    }

    fn init(
        transport: Arc<dyn Transport>,
        backend: Arc<dyn StorageBackend>,
        display_name: &str,
    ) -> Result<Self, TincanError> {
        // Idempotent tracing setup
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .try_init();

        let identity =
            IdentityManager::load_or_create(IdentityStore::new(backend.clone()), display_name)?;
        let directory = PeerDirectory::load(TrustStore::new(backend.clone()))?;
        let messages = MessageStore::load(backend)?;

        Ok(Self {
            state: Arc::new(RwLock::new(CoreState {
                identity,
                directory,
                messages,
                sync: SyncCoordinator::new(),
                broker: Broker::new(),
                is_hosting: false,
                is_browsing: false,
            })),
            transport,
            delegate: Arc::new(RwLock::new(None)),
        })
    }

    pub fn set_delegate(&self, delegate: Option<Arc<dyn ChatDelegate>>) {
        *self.delegate.write() = delegate;
    }

    fn with_delegate(&self, f: impl FnOnce(&dyn ChatDelegate)) {
        if let Some(delegate) = self.delegate.read().as_ref() {
            f(delegate.as_ref());
        }
    }

    /// Append a local system note; storage failures are logged, never raised.
    fn note(&self, text: impl Into<String>) {
        if let Err(err) = self.state.write().messages.append_system(text) {
            tracing::error!("failed to store system note: {err:#}");
        }
    }

    // ------------------------------------------------------------------------
    // TRANSPORT EVENT DISPATCH
    // ------------------------------------------------------------------------

    /// Single entry point for everything the transport delivers. Events for
    /// one peer are expected in transport order; across peers any
    /// interleaving is fine.
    pub fn handle_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::PeerFound {
                device_id,
                display_name,
                info,
            } => {
                let notify = self
                    .state
                    .write()
                    .directory
                    .on_peer_discovered(&device_id, &display_name, info);
                if notify {
                    self.with_delegate(|d| d.on_peer_discovered(device_id, display_name));
                }
            }

            LinkEvent::PeerLost { device_id } => {
                let canceled = {
                    let mut core = self.state.write();
                    let core = &mut *core;
                    core.directory.on_peer_lost(&device_id);
                    // A deleted record takes its pending invitation with it;
                    // a later resolve must find nothing.
                    if core.directory.get(&device_id).is_none() {
                        core.broker.cancel(&device_id)
                    } else {
                        None
                    }
                };
                if let Some(responder) = canceled {
                    responder.respond(false);
                }
            }

            LinkEvent::ConnectionChanged { device_id, state } => {
                self.on_connection_changed(&device_id, state);
            }

            LinkEvent::Invitation {
                device_id,
                context,
                responder,
            } => {
                let (outcome, display_name) = {
                    let mut core = self.state.write();
                    let core = &mut *core;
                    let outcome = core.broker.on_inbound_invitation(
                        &mut core.directory,
                        &device_id,
                        &context,
                        responder,
                    );
                    let name = core
                        .directory
                        .get(&device_id)
                        .map(|r| r.display_name.clone())
                        .unwrap_or_else(|| device_id.clone());
                    (outcome, name)
                };
                // Responders fire after the lock is released; their callbacks
                // may re-enter handle_event synchronously.
                match outcome {
                    InviteOutcome::AutoDeclined(_, responder) => responder.respond(false),
                    InviteOutcome::AutoAccepted(responder) => responder.respond(true),
                    InviteOutcome::Deferred => {
                        self.with_delegate(|d| d.on_invitation_requested(device_id, display_name));
                    }
                }
            }

            LinkEvent::Data { device_id, payload } => {
                self.on_data(&device_id, &payload);
            }
        }
    }

    fn on_connection_changed(&self, device_id: &str, state: LinkState) {
        let (outcome, new_state, history_push, canceled) = {
            let mut core = self.state.write();
            let core = &mut *core;
            let outcome = match core.directory.on_connection_changed(device_id, state) {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::error!(device_id, "connection transition failed: {err:#}");
                    return;
                }
            };
            let new_state = core.directory.get(device_id).map(|r| r.state);

            // Full-state push on every transition into connected
            let history_push = if outcome == ConnectionOutcome::BecameConnected
                && !core.messages.is_empty()
            {
                encode_payload(&WirePayload::Sync(core.messages.messages().to_vec())).ok()
            } else {
                None
            };
            let canceled = if outcome == ConnectionOutcome::Removed {
                core.broker.cancel(device_id)
            } else {
                None
            };
            (outcome, new_state, history_push, canceled)
        };

        if let Some(responder) = canceled {
            responder.respond(false);
        }

        if let Some(state) = new_state {
            self.with_delegate(|d| d.on_connection_changed(device_id.to_string(), state));
        } else if outcome == ConnectionOutcome::Removed {
            self.with_delegate(|d| {
                d.on_connection_changed(device_id.to_string(), ConnectionState::Disconnected)
            });
        }

        if let Some(payload) = history_push {
            if let Err(err) = self
                .transport
                .send_reliable(&[device_id.to_string()], payload)
            {
                tracing::warn!(device_id, "history push failed: {err}");
                self.note("Could not send chat history to peer");
            }
        }
    }

    fn on_data(&self, device_id: &str, payload: &[u8]) {
        enum Reaction {
            None,
            NewMessage(ChatMessage),
            Conflict(String),
        }

        let reaction = {
            let mut core = self.state.write();
            let core = &mut *core;
            let (sender_user, sender_name) = core
                .directory
                .get(device_id)
                .map(|r| {
                    (
                        r.user_id.unwrap_or_else(Uuid::nil),
                        r.display_name.clone(),
                    )
                })
                .unwrap_or_else(|| (Uuid::nil(), device_id.to_string()));

            match decode_payload(payload, sender_user, &sender_name) {
                Ok(WirePayload::Chat(msg)) => {
                    match core.messages.merge(vec![msg.clone()]) {
                        Ok(1) => Reaction::NewMessage(msg),
                        Ok(_) => Reaction::None,
                        Err(err) => {
                            tracing::error!("failed to store chat message: {err:#}");
                            Reaction::None
                        }
                    }
                }
                Ok(WirePayload::Sync(history)) => {
                    match core.sync.on_history_received(
                        &mut core.messages,
                        device_id,
                        &sender_name,
                        history,
                    ) {
                        Ok(SyncOutcome::ConflictDetected) => Reaction::Conflict(sender_name),
                        Ok(_) => Reaction::None,
                        Err(err) => {
                            tracing::error!("history merge failed: {err:#}");
                            Reaction::None
                        }
                    }
                }
                Ok(WirePayload::SyncDecision { use_remote }) => {
                    if let Err(err) =
                        core.sync
                            .on_decision_received(&mut core.messages, device_id, use_remote)
                    {
                        tracing::error!("failed to apply sync decision: {err:#}");
                    }
                    Reaction::None
                }
                Ok(WirePayload::ForgetDevice { user_id }) => {
                    // A peer may only ask to be forgotten itself. Anything
                    // else is a forged attempt to evict a third party.
                    if sender_user != Uuid::nil() && user_id == sender_user {
                        tracing::info!(device_id, %user_id, "peer requested forget");
                        if let Err(err) = core.directory.forget(user_id) {
                            tracing::error!("forget request failed: {err:#}");
                        }
                    } else {
                        tracing::warn!(
                            device_id,
                            %user_id,
                            "dropping forget request that does not match the sender"
                        );
                    }
                    Reaction::None
                }
                Err(err) => {
                    tracing::warn!(device_id, "undecodable payload: {err:#}");
                    let _ = core.messages.append_system("Received an unreadable message");
                    Reaction::None
                }
            }
        };

        match reaction {
            Reaction::None => {}
            Reaction::NewMessage(msg) => {
                self.with_delegate(|d| d.on_message_received(msg));
            }
            Reaction::Conflict(name) => {
                self.with_delegate(|d| d.on_sync_conflict(device_id.to_string(), name));
            }
        }
    }

    // ------------------------------------------------------------------------
    // SESSION LIFECYCLE
    // ------------------------------------------------------------------------

    /// Start advertising and browsing. Transport failures reset the matching
    /// flag and surface a system note; retry is a user action.
    pub fn connect(&self) {
        match self.transport.start_advertising() {
            Ok(()) => self.state.write().is_hosting = true,
            Err(err) => {
                tracing::warn!("advertising failed: {err}");
                self.state.write().is_hosting = false;
                self.note("Could not start hosting");
            }
        }
        match self.transport.start_browsing() {
            Ok(()) => self.state.write().is_browsing = true,
            Err(err) => {
                tracing::warn!("browsing failed: {err}");
                self.state.write().is_browsing = false;
                self.note("Could not start browsing");
            }
        }
    }

    /// Stop all sessions. Pending invitations and parked conflicts are
    /// cleared atomically with the flags; chat history is untouched.
    pub fn disconnect(&self) {
        let withdrawn = {
            let mut core = self.state.write();
            let withdrawn = core.broker.drain();
            core.sync.clear();
            core.is_hosting = false;
            core.is_browsing = false;
            withdrawn
        };
        for responder in withdrawn {
            responder.respond(false);
        }
        if let Err(err) = self.transport.stop_advertising() {
            tracing::warn!("stop advertising failed: {err}");
        }
        if let Err(err) = self.transport.stop_browsing() {
            tracing::warn!("stop browsing failed: {err}");
        }
        self.transport.disconnect_all();
    }

    pub fn is_hosting(&self) -> bool {
        self.state.read().is_hosting
    }

    pub fn is_browsing(&self) -> bool {
        self.state.read().is_browsing
    }

    // ------------------------------------------------------------------------
    // COMMANDS
    // ------------------------------------------------------------------------

    /// Store a message locally and push it to every connected peer. Having
    /// no peers is not an error; the message waits in the local history.
    pub fn send_message(&self, text: &str) -> Result<ChatMessage, TincanError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(TincanError::InvalidInput);
        }

        let (msg, recipients) = {
            let mut core = self.state.write();
            let msg = ChatMessage::user(
                core.identity.user_id(),
                core.identity.display_name(),
                trimmed,
            );
            core.messages.append(msg.clone())?;
            (msg, core.directory.connected_device_ids())
        };

        if !recipients.is_empty() {
            let payload = encode_payload(&WirePayload::Chat(msg.clone()))?;
            if let Err(err) = self.transport.send_reliable(&recipients, payload) {
                tracing::warn!("message send failed: {err}");
                self.note("Message stored locally; delivery failed");
            }
        }
        Ok(msg)
    }

    /// Invite a discovered peer. Unknown device ids are warned no-ops.
    pub fn invite_peer(&self, device_id: &str) {
        let context = {
            let mut core = self.state.write();
            if !core.directory.mark_invitation_sent(device_id) {
                return;
            }
            InviteContext {
                device_id: core.identity.device_id().to_string(),
                display_name: core.identity.display_name().to_string(),
                user_id: core.identity.user_id(),
            }
        };

        if let Err(err) =
            self.transport
                .send_invitation(device_id, context.encode(), INVITE_TIMEOUT_SECS)
        {
            tracing::warn!(device_id, "invitation send failed: {err}");
            self.state
                .write()
                .directory
                .set_state(device_id, ConnectionState::Discovered);
            self.note("Could not send invitation");
        }
    }

    /// Accept or decline a deferred inbound invitation.
    pub fn resolve_invitation(&self, device_id: &str, accept: bool) {
        let responder = {
            let mut core = self.state.write();
            let core = &mut *core;
            core.broker.resolve(&mut core.directory, device_id, accept)
        };
        if let Some(responder) = responder {
            responder.respond(accept);
        }
    }

    /// Decide the surfaced history conflict: keep local (`use_remote =
    /// false`) or adopt the remote history (`true`). The decision is applied
    /// locally and sent to the peer, which interprets it inverted.
    pub fn resolve_sync_conflict(&self, use_remote: bool) -> Result<(), TincanError> {
        let target = {
            let mut core = self.state.write();
            let core = &mut *core;
            core.sync.resolve_current(&mut core.messages, use_remote)?
        };

        if let Some(device_id) = target {
            let payload = encode_payload(&WirePayload::SyncDecision { use_remote })?;
            if let Err(err) = self.transport.send_reliable(&[device_id.clone()], payload) {
                tracing::warn!(%device_id, "sync decision send failed: {err}");
                self.note("Could not send sync decision to peer");
            }
        }
        Ok(())
    }

    /// Drop a user from the allowlist and ask their connected devices to
    /// drop us in return.
    pub fn forget_device(&self, user_id: Uuid) -> Result<(), TincanError> {
        let (recipients, own_user) = {
            let mut core = self.state.write();
            let recipients = core.directory.connected_devices_of(user_id);
            core.directory.forget(user_id)?;
            (recipients, core.identity.user_id())
        };

        if !recipients.is_empty() {
            let payload = encode_payload(&WirePayload::ForgetDevice { user_id: own_user })?;
            if let Err(err) = self.transport.send_reliable(&recipients, payload) {
                tracing::warn!("forget request send failed: {err}");
            }
        }
        Ok(())
    }

    /// Block a user. Existing sessions stay up; all future invitations and
    /// auto-connects for this user are refused.
    pub fn block_user(&self, user_id: Uuid) -> Result<(), TincanError> {
        self.state.write().directory.block(user_id)?;
        Ok(())
    }

    pub fn set_sync_enabled(&self, user_id: Uuid, enabled: bool) -> Result<bool, TincanError> {
        Ok(self.state.write().directory.set_sync_enabled(user_id, enabled)?)
    }

    pub fn set_display_name(&self, name: &str) -> Result<(), TincanError> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(TincanError::InvalidInput);
        }
        self.state
            .write()
            .identity
            .set_display_name(trimmed.to_string())?;
        Ok(())
    }

    /// Mint a fresh identity. Deliberate user action only; never triggered
    /// by a display-name change.
    pub fn rotate_identity(&self) -> Result<IdentityInfo, TincanError> {
        let mut core = self.state.write();
        core.identity.rotate()?;
        Ok(IdentityInfo {
            device_id: core.identity.device_id().to_string(),
            user_id: core.identity.user_id(),
            display_name: core.identity.display_name().to_string(),
        })
    }

    // ------------------------------------------------------------------------
    // SNAPSHOTS
    // ------------------------------------------------------------------------

    pub fn identity_info(&self) -> IdentityInfo {
        let core = self.state.read();
        IdentityInfo {
            device_id: core.identity.device_id().to_string(),
            user_id: core.identity.user_id(),
            display_name: core.identity.display_name().to_string(),
        }
    }

    /// Discovery-info map this device advertises.
    pub fn advertised_info(&self) -> std::collections::HashMap<String, String> {
        let core = self.state.read();
        let mut info = std::collections::HashMap::new();
        info.insert(
            USER_ID_INFO_KEY.to_string(),
            core.identity.user_id().to_string(),
        );
        info
    }

    pub fn peers(&self) -> Vec<PeerSnapshot> {
        let core = self.state.read();
        core.directory
            .peers()
            .map(|r| PeerSnapshot {
                device_id: r.device_id.clone(),
                display_name: r.display_name.clone(),
                state: r.state,
                is_nearby: r.is_nearby,
                user_id: r.user_id,
                sync_enabled: r
                    .user_id
                    .map(|u| core.directory.is_sync_enabled(&u))
                    .unwrap_or(false),
            })
            .collect()
    }

    pub fn connected_peers(&self) -> Vec<String> {
        self.state.read().directory.connected_device_ids()
    }

    pub fn known_peers(&self) -> Vec<KnownPeer> {
        self.state.read().directory.known_peers().cloned().collect()
    }

    pub fn blocked_users(&self) -> Vec<Uuid> {
        self.state.read().directory.blocked_users().copied().collect()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.state.read().messages.messages().to_vec()
    }

    /// The conflict currently awaiting a decision: `(device_id, name)`.
    pub fn pending_conflict(&self) -> Option<(String, String)> {
        self.state
            .read()
            .sync
            .current_conflict()
            .map(|p| (p.device_id.clone(), p.peer_name.clone()))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::local::{LoopbackTransport, Outbound};
    use crate::transport::{InvitationResponder, MockTransport};

    fn core() -> (Tincan, Arc<LoopbackTransport>) {
        let transport = Arc::new(LoopbackTransport::new());
        let core = Tincan::new(transport.clone(), "test-device").unwrap();
        (core, transport)
    }

    fn found_event(device_id: &str, name: &str, user_id: Uuid) -> LinkEvent {
        let mut info = std::collections::HashMap::new();
        info.insert(USER_ID_INFO_KEY.to_string(), user_id.to_string());
        LinkEvent::PeerFound {
            device_id: device_id.into(),
            display_name: name.into(),
            info,
        }
    }

    fn connect_peer(core: &Tincan, device_id: &str) {
        core.handle_event(LinkEvent::ConnectionChanged {
            device_id: device_id.into(),
            state: LinkState::Connected,
        });
    }

    #[test]
    fn test_send_message_without_peers_is_stored() {
        let (core, transport) = core();
        let msg = core.send_message("hello, void").unwrap();

        assert_eq!(core.messages().len(), 1);
        assert_eq!(core.messages()[0].id, msg.id);
        assert!(transport.drain().is_empty());
    }

    #[test]
    fn test_send_message_rejects_blank_text() {
        let (core, _) = core();
        assert!(matches!(
            core.send_message("   "),
            Err(TincanError::InvalidInput)
        ));
    }

    #[test]
    fn test_send_message_reaches_connected_peers() {
        let (core, transport) = core();
        core.handle_event(found_event("dev-b", "B", Uuid::new_v4()));
        connect_peer(&core, "dev-b");
        transport.drain(); // discard the empty-history-suppressed push

        core.send_message("hi").unwrap();
        let sent = transport.drain();
        assert!(sent.iter().any(|o| matches!(
            o,
            Outbound::Reliable { to, .. } if to == &vec!["dev-b".to_string()]
        )));
    }

    #[test]
    fn test_connection_triggers_history_push_when_nonempty() {
        let (core, transport) = core();
        core.send_message("pre-existing").unwrap();
        core.handle_event(found_event("dev-b", "B", Uuid::new_v4()));
        connect_peer(&core, "dev-b");

        let pushed = transport.drain().into_iter().find_map(|o| match o {
            Outbound::Reliable { payload, .. } => {
                decode_payload(&payload, Uuid::nil(), "x").ok()
            }
            _ => None,
        });
        assert!(matches!(pushed, Some(WirePayload::Sync(history)) if history.len() == 1));
    }

    #[test]
    fn test_empty_history_is_not_pushed() {
        let (core, transport) = core();
        core.handle_event(found_event("dev-b", "B", Uuid::new_v4()));
        connect_peer(&core, "dev-b");
        assert!(transport.drain().is_empty());
    }

    #[test]
    fn test_incoming_chat_payload_is_merged_once() {
        let (core, _) = core();
        let sender = Uuid::new_v4();
        core.handle_event(found_event("dev-b", "B", sender));
        connect_peer(&core, "dev-b");

        let msg = ChatMessage::user(sender, "B", "hello");
        let payload = encode_payload(&WirePayload::Chat(msg.clone())).unwrap();
        core.handle_event(LinkEvent::Data {
            device_id: "dev-b".into(),
            payload: payload.clone(),
        });
        core.handle_event(LinkEvent::Data {
            device_id: "dev-b".into(),
            payload,
        });

        let stored: Vec<_> = core
            .messages()
            .into_iter()
            .filter(|m| !m.is_system)
            .collect();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, msg.id);
    }

    #[test]
    fn test_unreadable_payload_becomes_system_note() {
        let (core, _) = core();
        core.handle_event(LinkEvent::Data {
            device_id: "dev-b".into(),
            payload: vec![0xff, 0xfe, 0xfd],
        });

        let messages = core.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_system);
        assert!(messages[0].content.contains("unreadable"));
    }

    #[test]
    fn test_plain_text_payload_is_best_effort_chat() {
        let (core, _) = core();
        let sender = Uuid::new_v4();
        core.handle_event(found_event("dev-b", "B", sender));
        core.handle_event(LinkEvent::Data {
            device_id: "dev-b".into(),
            payload: b"legacy text".to_vec(),
        });

        let messages = core.messages();
        assert_eq!(messages.len(), 1);
        assert!(!messages[0].is_system);
        assert_eq!(messages[0].content, "legacy text");
        assert_eq!(messages[0].sender_user_id, sender);
    }

    #[test]
    fn test_forget_request_for_another_user_is_dropped() {
        let (core, _) = core();
        let carol = Uuid::new_v4();
        let mallory = Uuid::new_v4();
        core.handle_event(found_event("dev-c", "Carol", carol));
        connect_peer(&core, "dev-c");
        core.handle_event(found_event("dev-m", "Mallory", mallory));
        connect_peer(&core, "dev-m");
        assert!(core.known_peers().iter().any(|k| k.user_id == carol));

        // Mallory names Carol's user id instead of her own
        let payload = encode_payload(&WirePayload::ForgetDevice { user_id: carol }).unwrap();
        core.handle_event(LinkEvent::Data {
            device_id: "dev-m".into(),
            payload,
        });

        assert!(core.known_peers().iter().any(|k| k.user_id == carol));
        assert!(core.known_peers().iter().any(|k| k.user_id == mallory));
    }

    #[test]
    fn test_forget_request_from_unidentified_sender_is_dropped() {
        let (core, _) = core();
        let carol = Uuid::new_v4();
        core.handle_event(found_event("dev-c", "Carol", carol));
        connect_peer(&core, "dev-c");

        // Sender with no record at all
        let payload = encode_payload(&WirePayload::ForgetDevice { user_id: carol }).unwrap();
        core.handle_event(LinkEvent::Data {
            device_id: "dev-ghost".into(),
            payload,
        });

        assert!(core.known_peers().iter().any(|k| k.user_id == carol));
    }

    #[test]
    fn test_forget_request_from_peer_drops_allowlist_entry() {
        let (core, _) = core();
        let user = Uuid::new_v4();
        core.handle_event(found_event("dev-b", "B", user));
        connect_peer(&core, "dev-b");
        assert!(core.known_peers().iter().any(|k| k.user_id == user));

        let payload = encode_payload(&WirePayload::ForgetDevice { user_id: user }).unwrap();
        core.handle_event(LinkEvent::Data {
            device_id: "dev-b".into(),
            payload,
        });
        assert!(!core.known_peers().iter().any(|k| k.user_id == user));
    }

    #[test]
    fn test_resolve_after_peer_loss_never_accepts() {
        let (core, _) = core();
        let user = Uuid::new_v4();
        let accepts = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counted = accepts.clone();
        core.handle_event(LinkEvent::Invitation {
            device_id: "dev-b".into(),
            context: InviteContext {
                device_id: "dev-b".into(),
                display_name: "B".into(),
                user_id: user,
            }
            .encode(),
            responder: InvitationResponder::new(move |accept| {
                if accept {
                    counted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                }
            }),
        });

        // The inviter vanishes before the user decides; the record and the
        // retained decision go together
        core.handle_event(LinkEvent::PeerLost {
            device_id: "dev-b".into(),
        });
        assert!(core.peers().is_empty());

        core.resolve_invitation("dev-b", true);
        assert_eq!(accepts.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn test_responder_may_reenter_core_synchronously() {
        let (core, _) = core();
        let user = Uuid::new_v4();
        core.handle_event(found_event("dev-b", "B", user));
        let reentrant = core.clone();
        core.handle_event(LinkEvent::Invitation {
            device_id: "dev-b".into(),
            context: InviteContext {
                device_id: "dev-b".into(),
                display_name: "B".into(),
                user_id: user,
            }
            .encode(),
            responder: InvitationResponder::new(move |accept| {
                // A synchronous transport reports the link inline
                if accept {
                    reentrant.handle_event(LinkEvent::ConnectionChanged {
                        device_id: "dev-b".into(),
                        state: LinkState::Connected,
                    });
                }
            }),
        });

        core.resolve_invitation("dev-b", true);
        assert_eq!(core.connected_peers(), vec!["dev-b".to_string()]);
    }

    #[test]
    fn test_auto_decline_responder_may_reenter_core() {
        let (core, _) = core();
        let user = Uuid::new_v4();
        core.block_user(user).unwrap();
        let reentrant = core.clone();
        core.handle_event(LinkEvent::Invitation {
            device_id: "dev-m".into(),
            context: InviteContext {
                device_id: "dev-m".into(),
                display_name: "M".into(),
                user_id: user,
            }
            .encode(),
            responder: InvitationResponder::new(move |accept| {
                if !accept {
                    reentrant.handle_event(LinkEvent::ConnectionChanged {
                        device_id: "dev-m".into(),
                        state: LinkState::NotConnected,
                    });
                }
            }),
        });

        assert!(core.connected_peers().is_empty());
        assert!(core.peers().is_empty());
    }

    #[test]
    fn test_connect_failure_resets_flag_and_notes() {
        let mut mock = MockTransport::new();
        mock.expect_start_advertising()
            .returning(|| Err(TransportError::Advertise("radio off".into())));
        mock.expect_start_browsing().returning(|| Ok(()));

        let core = Tincan::new(Arc::new(mock), "test-device").unwrap();
        core.connect();

        assert!(!core.is_hosting());
        assert!(core.is_browsing());
        assert!(core
            .messages()
            .iter()
            .any(|m| m.is_system && m.content.contains("hosting")));
    }

    #[test]
    fn test_disconnect_clears_pending_state_but_keeps_history() {
        let (core, _) = core();
        core.send_message("keep me").unwrap();

        // Park a conflict and a deferred invitation
        core.handle_event(found_event("dev-b", "B", Uuid::new_v4()));
        let local_only = core.send_message("mine too").unwrap();
        let remote = vec![ChatMessage::user(Uuid::new_v4(), "B", "theirs")];
        let payload = encode_payload(&WirePayload::Sync(remote)).unwrap();
        core.handle_event(LinkEvent::Data {
            device_id: "dev-b".into(),
            payload,
        });
        assert!(core.pending_conflict().is_some());
        core.handle_event(LinkEvent::Invitation {
            device_id: "dev-c".into(),
            context: InviteContext {
                device_id: "dev-c".into(),
                display_name: "C".into(),
                user_id: Uuid::new_v4(),
            }
            .encode(),
            responder: InvitationResponder::new(|_| {}),
        });

        core.disconnect();

        assert!(core.pending_conflict().is_none());
        assert!(core.messages().iter().any(|m| m.id == local_only.id));
        assert!(!core.is_hosting());
    }

    #[test]
    fn test_rotate_identity_changes_ids() {
        let (core, _) = core();
        let before = core.identity_info();
        let after = core.rotate_identity().unwrap();
        assert_ne!(before.device_id, after.device_id);
        assert_ne!(before.user_id, after.user_id);
    }

    #[test]
    fn test_advertised_info_carries_user_id() {
        let (core, _) = core();
        let info = core.advertised_info();
        assert_eq!(
            info.get(USER_ID_INFO_KEY),
            Some(&core.identity_info().user_id.to_string())
        );
    }
}
