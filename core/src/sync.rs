// Sync Coordinator — full-history exchange and two-party conflict resolution
//
// On every transition to connected the local side pushes its entire history.
// Receiving a peer's history either merges cleanly (one side is a subset of
// the other) or flags a conflict: both sides hold messages the other lacks.
// A conflict parks the remote history in a PendingSync — at most one per
// peer — until one side decides.
//
// Decision semantics are local-centric: `use_remote = true` means "I am
// adopting your history". The receiver therefore interprets it inverted:
// a received `true` needs no action, a received `false` means adopting the
// history that peer sent earlier. Exactly one side performs an adoption, so
// both converge on the decider's chosen message set.

use crate::message::ChatMessage;
use crate::store::MessageStore;
use anyhow::Result;
use std::collections::HashSet;
use uuid::Uuid;

/// A parked conflict: the remote history waiting for a decision.
#[derive(Debug, Clone)]
pub struct PendingSync {
    pub device_id: String,
    pub peer_name: String,
    pub remote: Vec<ChatMessage>,
}

/// What an incoming history push amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Histories were compatible; `n` new messages were inserted
    Merged(usize),
    /// Both sides hold messages the other lacks; decision required
    ConflictDetected,
    /// Dropped: a conflict with this peer is already pending
    Ignored,
}

/// True iff the two non-system sets each contain ids absent from the other.
pub fn histories_conflict(local_ids: &HashSet<Uuid>, remote: &[ChatMessage]) -> bool {
    let remote_ids: HashSet<Uuid> = remote
        .iter()
        .filter(|m| !m.is_system)
        .map(|m| m.id)
        .collect();

    let local_only = local_ids.difference(&remote_ids).next().is_some();
    let remote_only = remote_ids.difference(local_ids).next().is_some();
    local_only && remote_only
}

#[derive(Default)]
pub struct SyncCoordinator {
    // Arrival order; the front entry is the one surfaced to the UI
    pending: Vec<PendingSync>,
}

impl SyncCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a full history received from `device_id`.
    pub fn on_history_received(
        &mut self,
        store: &mut MessageStore,
        device_id: &str,
        peer_name: &str,
        remote: Vec<ChatMessage>,
    ) -> Result<SyncOutcome> {
        if self.has_pending(device_id) {
            tracing::warn!(device_id, "history received while a conflict is pending; ignored");
            return Ok(SyncOutcome::Ignored);
        }

        if histories_conflict(&store.non_system_ids(), &remote) {
            tracing::info!(device_id, "history conflict detected");
            self.pending.push(PendingSync {
                device_id: device_id.to_string(),
                peer_name: peer_name.to_string(),
                remote,
            });
            return Ok(SyncOutcome::ConflictDetected);
        }

        let inserted = store.merge(remote)?;
        if inserted > 0 {
            store.append_system(format!(
                "Synced {inserted} message(s) from {peer_name}"
            ))?;
        }
        Ok(SyncOutcome::Merged(inserted))
    }

    /// Apply the local user's decision to the surfaced conflict.
    ///
    /// Returns the device the `SyncDecision` must be sent to, or None when
    /// nothing was pending (warned no-op; covers racing decisions).
    pub fn resolve_current(
        &mut self,
        store: &mut MessageStore,
        use_remote: bool,
    ) -> Result<Option<String>> {
        if self.pending.is_empty() {
            tracing::warn!("conflict resolution with nothing pending");
            return Ok(None);
        }
        let conflict = self.pending.remove(0);

        if use_remote {
            store.adopt_remote_history(
                conflict.remote,
                format!("Adopted chat history from {}", conflict.peer_name),
            )?;
        } else {
            store.append_system(format!(
                "Kept local chat history over {}'s",
                conflict.peer_name
            ))?;
        }
        Ok(Some(conflict.device_id))
    }

    /// Apply a decision received from the peer — inverted interpretation.
    pub fn on_decision_received(
        &mut self,
        store: &mut MessageStore,
        device_id: &str,
        use_remote: bool,
    ) -> Result<()> {
        let Some(index) = self.pending.iter().position(|p| p.device_id == device_id) else {
            tracing::warn!(device_id, "sync decision with no pending conflict");
            return Ok(());
        };
        let conflict = self.pending.remove(index);

        if use_remote {
            // The peer adopted our history; ours is already the final state.
            tracing::info!(device_id, "peer adopted local history");
        } else {
            // The peer kept its own; adopt the history it sent us earlier.
            store.adopt_remote_history(
                conflict.remote,
                format!("Adopted chat history from {}", conflict.peer_name),
            )?;
        }
        Ok(())
    }

    pub fn has_pending(&self, device_id: &str) -> bool {
        self.pending.iter().any(|p| p.device_id == device_id)
    }

    /// The conflict currently surfaced to the UI, if any.
    pub fn current_conflict(&self) -> Option<&PendingSync> {
        self.pending.first()
    }

    /// Drop every parked conflict. Used on global disconnect.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
