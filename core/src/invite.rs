// Invitation Broker — decides what happens to inbound connection requests
//
// Each inbound invitation ends in exactly one of: auto-decline (blocked or
// duplicate), auto-accept (mutual sync trust), or a deferred decision held
// for the user. The broker never answers a responder itself; it hands the
// responder back to the caller, which fires it after releasing its state
// lock (responder callbacks may re-enter the core synchronously). Retained
// responders fire exactly once; `resolve` on a device with nothing retained
// is a warned no-op, which covers the race where the inviter canceled
// before the user decided.

use crate::peers::{ConnectionState, PeerDirectory};
use crate::transport::{InvitationResponder, InviteContext};
use std::collections::HashMap;

/// How the broker disposed of an inbound invitation. The auto variants carry
/// the unanswered responder; the caller must fire it with the matching
/// answer once it is safe to do so.
#[derive(Debug)]
pub enum InviteOutcome {
    /// Declined without user interaction; respond with `false`
    AutoDeclined(DeclineReason, InvitationResponder),
    /// Accepted without user interaction; respond with `true`
    AutoAccepted(InvitationResponder),
    /// Decision retained; the UI must call `resolve`
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclineReason {
    BlockedUser,
    AlreadyConnected,
}

#[derive(Default)]
pub struct InvitationBroker {
    pending: HashMap<String, InvitationResponder>,
}

impl InvitationBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle an inbound invitation from `device_id`.
    ///
    /// The blocked path never transitions the peer record — a blocked user's
    /// invitation leaves no trace beyond a log line.
    pub fn on_inbound_invitation(
        &mut self,
        directory: &mut PeerDirectory,
        device_id: &str,
        context: &[u8],
        responder: InvitationResponder,
    ) -> InviteOutcome {
        let ctx = InviteContext::decode(context);

        if let Some(user_id) = ctx.as_ref().map(|c| c.user_id) {
            if directory.is_blocked(&user_id) {
                tracing::info!(device_id, %user_id, "declining invitation from blocked user");
                return InviteOutcome::AutoDeclined(DeclineReason::BlockedUser, responder);
            }
        }

        if directory
            .get(device_id)
            .map(|r| r.state == ConnectionState::Connected)
            .unwrap_or(false)
        {
            tracing::info!(device_id, "declining duplicate invitation from connected peer");
            return InviteOutcome::AutoDeclined(DeclineReason::AlreadyConnected, responder);
        }

        let sync_trusted = ctx
            .as_ref()
            .map(|c| directory.is_sync_enabled(&c.user_id))
            .unwrap_or(false);

        if sync_trusted {
            // Mutual trust established previously: accept without holding a
            // decision, the responder is returned and never retained.
            directory.mark_invitation_received(device_id, ctx.as_ref());
            directory.set_state(device_id, ConnectionState::Connecting);
            tracing::info!(device_id, "auto-accepting invitation from sync-enabled peer");
            return InviteOutcome::AutoAccepted(responder);
        }

        directory.mark_invitation_received(device_id, ctx.as_ref());
        self.pending.insert(device_id.to_string(), responder);
        InviteOutcome::Deferred
    }

    /// Apply the user's accept/decline decision and return the retained
    /// responder, which the caller fires with the same answer. The responder
    /// is removed before use, so a double resolve returns None.
    pub fn resolve(
        &mut self,
        directory: &mut PeerDirectory,
        device_id: &str,
        accept: bool,
    ) -> Option<InvitationResponder> {
        let Some(responder) = self.pending.remove(device_id) else {
            tracing::warn!(device_id, "resolve with no pending invitation");
            return None;
        };

        if accept {
            directory.set_state(device_id, ConnectionState::Connecting);
        } else {
            directory.set_state(device_id, ConnectionState::Discovered);
        }
        Some(responder)
    }

    /// Withdraw the retained decision for a device whose record is gone
    /// (lost from discovery, or deleted on disconnect). The caller declines
    /// the returned responder; a later `resolve` finds nothing pending.
    pub fn cancel(&mut self, device_id: &str) -> Option<InvitationResponder> {
        let responder = self.pending.remove(device_id);
        if responder.is_some() {
            tracing::info!(device_id, "withdrawing pending invitation for removed peer");
        }
        responder
    }

    pub fn has_pending(&self, device_id: &str) -> bool {
        self.pending.contains_key(device_id)
    }

    pub fn pending_device_ids(&self) -> Vec<String> {
        self.pending.keys().cloned().collect()
    }

    /// Remove every retained decision. Used on global disconnect; the caller
    /// declines the returned responders.
    pub fn drain(&mut self) -> Vec<InvitationResponder> {
        self.pending
            .drain()
            .map(|(device_id, responder)| {
                tracing::debug!(device_id, "withdrawing pending invitation on shutdown");
                responder
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::backend::MemoryStorage;
    use crate::store::trust::TrustStore;
    use crate::transport::LinkState;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;
    use uuid::Uuid;

    fn directory() -> PeerDirectory {
        PeerDirectory::load(TrustStore::new(Arc::new(MemoryStorage::new()))).unwrap()
    }

    fn context_for(user_id: Uuid) -> Vec<u8> {
        InviteContext {
            device_id: "remote-dev".into(),
            display_name: "Remote".into(),
            user_id,
        }
        .encode()
    }

    /// Responder that records its answer: +1 accept, -1 decline, per call.
    fn counting_responder(counter: Arc<AtomicI32>) -> InvitationResponder {
        InvitationResponder::new(move |accept| {
            counter.fetch_add(if accept { 1 } else { -1 }, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_blocked_user_declined_without_record_transition() {
        let mut dir = directory();
        let mut broker = InvitationBroker::new();
        let user = Uuid::new_v4();
        dir.block(user).unwrap();

        let answer = Arc::new(AtomicI32::new(0));
        let outcome = broker.on_inbound_invitation(
            &mut dir,
            "remote-dev",
            &context_for(user),
            counting_responder(answer.clone()),
        );

        let InviteOutcome::AutoDeclined(reason, responder) = outcome else {
            panic!("expected auto-decline");
        };
        assert_eq!(reason, DeclineReason::BlockedUser);
        // The responder comes back unanswered; the caller declines
        assert_eq!(answer.load(Ordering::SeqCst), 0);
        responder.respond(false);
        assert_eq!(answer.load(Ordering::SeqCst), -1);
        assert!(dir.get("remote-dev").is_none());
        assert!(!broker.has_pending("remote-dev"));
    }

    #[test]
    fn test_duplicate_invitation_from_connected_peer_declined() {
        let mut dir = directory();
        let mut broker = InvitationBroker::new();
        let user = Uuid::new_v4();

        let mut info = std::collections::HashMap::new();
        info.insert(crate::peers::USER_ID_INFO_KEY.to_string(), user.to_string());
        dir.on_peer_discovered("remote-dev", "Remote", info);
        dir.on_connection_changed("remote-dev", LinkState::Connected)
            .unwrap();

        let answer = Arc::new(AtomicI32::new(0));
        let outcome = broker.on_inbound_invitation(
            &mut dir,
            "remote-dev",
            &context_for(user),
            counting_responder(answer.clone()),
        );

        let InviteOutcome::AutoDeclined(reason, responder) = outcome else {
            panic!("expected auto-decline");
        };
        assert_eq!(reason, DeclineReason::AlreadyConnected);
        responder.respond(false);
        assert_eq!(answer.load(Ordering::SeqCst), -1);
    }

    #[test]
    fn test_sync_enabled_peer_is_auto_accepted() {
        let mut dir = directory();
        let mut broker = InvitationBroker::new();
        let user = Uuid::new_v4();
        dir.remember_user(user, "Remote".into()).unwrap();
        dir.set_sync_enabled(user, true).unwrap();

        let answer = Arc::new(AtomicI32::new(0));
        let outcome = broker.on_inbound_invitation(
            &mut dir,
            "remote-dev",
            &context_for(user),
            counting_responder(answer.clone()),
        );

        let InviteOutcome::AutoAccepted(responder) = outcome else {
            panic!("expected auto-accept");
        };
        responder.respond(true);
        assert_eq!(answer.load(Ordering::SeqCst), 1);
        let record = dir.get("remote-dev").unwrap();
        assert_eq!(record.state, ConnectionState::Connecting);
        assert!(record.is_nearby);
        assert!(!broker.has_pending("remote-dev"));
    }

    #[test]
    fn test_unknown_peer_is_deferred() {
        let mut dir = directory();
        let mut broker = InvitationBroker::new();

        let answer = Arc::new(AtomicI32::new(0));
        let outcome = broker.on_inbound_invitation(
            &mut dir,
            "remote-dev",
            &context_for(Uuid::new_v4()),
            counting_responder(answer.clone()),
        );

        assert!(matches!(outcome, InviteOutcome::Deferred));
        assert_eq!(answer.load(Ordering::SeqCst), 0);
        assert!(broker.has_pending("remote-dev"));
        assert_eq!(
            dir.get("remote-dev").unwrap().state,
            ConnectionState::InvitationReceived
        );
    }

    #[test]
    fn test_resolve_accept_exactly_once() {
        let mut dir = directory();
        let mut broker = InvitationBroker::new();
        let answer = Arc::new(AtomicI32::new(0));
        broker.on_inbound_invitation(
            &mut dir,
            "remote-dev",
            &context_for(Uuid::new_v4()),
            counting_responder(answer.clone()),
        );

        let responder = broker.resolve(&mut dir, "remote-dev", true);
        responder.expect("first resolve returns the responder").respond(true);
        assert_eq!(answer.load(Ordering::SeqCst), 1);
        assert_eq!(dir.get("remote-dev").unwrap().state, ConnectionState::Connecting);

        // Second resolve finds nothing: one accept side-effect total
        assert!(broker.resolve(&mut dir, "remote-dev", true).is_none());
        assert_eq!(answer.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resolve_decline_returns_peer_to_discovered() {
        let mut dir = directory();
        let mut broker = InvitationBroker::new();
        let answer = Arc::new(AtomicI32::new(0));
        broker.on_inbound_invitation(
            &mut dir,
            "remote-dev",
            &context_for(Uuid::new_v4()),
            counting_responder(answer.clone()),
        );

        let responder = broker.resolve(&mut dir, "remote-dev", false);
        responder.expect("responder retained until resolve").respond(false);
        assert_eq!(answer.load(Ordering::SeqCst), -1);
        assert_eq!(dir.get("remote-dev").unwrap().state, ConnectionState::Discovered);
    }

    #[test]
    fn test_resolve_without_pending_is_noop() {
        let mut dir = directory();
        let mut broker = InvitationBroker::new();
        assert!(broker.resolve(&mut dir, "ghost", true).is_none());
    }

    #[test]
    fn test_cancel_withdraws_the_retained_decision() {
        let mut dir = directory();
        let mut broker = InvitationBroker::new();
        let answer = Arc::new(AtomicI32::new(0));
        broker.on_inbound_invitation(
            &mut dir,
            "remote-dev",
            &context_for(Uuid::new_v4()),
            counting_responder(answer.clone()),
        );

        let responder = broker.cancel("remote-dev");
        responder.expect("cancel returns the responder").respond(false);
        assert_eq!(answer.load(Ordering::SeqCst), -1);

        // The decision is gone; a late user answer is a no-op
        assert!(broker.resolve(&mut dir, "remote-dev", true).is_none());
        assert_eq!(answer.load(Ordering::SeqCst), -1);
        assert!(broker.cancel("never-invited").is_none());
    }

    #[test]
    fn test_drain_returns_every_retained_decision() {
        let mut dir = directory();
        let mut broker = InvitationBroker::new();
        let answer = Arc::new(AtomicI32::new(0));
        broker.on_inbound_invitation(
            &mut dir,
            "dev-1",
            &context_for(Uuid::new_v4()),
            counting_responder(answer.clone()),
        );
        broker.on_inbound_invitation(
            &mut dir,
            "dev-2",
            &context_for(Uuid::new_v4()),
            counting_responder(answer.clone()),
        );

        let drained = broker.drain();
        assert_eq!(drained.len(), 2);
        for responder in drained {
            responder.respond(false);
        }
        assert_eq!(answer.load(Ordering::SeqCst), -2);
        assert!(broker.pending_device_ids().is_empty());
    }
}
