// Chat history store — ordered message collection with idempotent merge
//
// Ordering invariant: after any batch of inserts the collection is re-sorted
// by timestamp. The sort is stable and entries are held in arrival order
// between sorts, so timestamp ties keep their original insertion order.
// Persistence keys encode the arrival sequence for the same reason.

use crate::message::ChatMessage;
use crate::store::backend::StorageBackend;
use anyhow::{anyhow, Result};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

const MSG_PREFIX: &str = "msg_";

pub struct MessageStore {
    backend: Arc<dyn StorageBackend>,
    messages: Vec<ChatMessage>,
    next_seq: u64,
}

impl MessageStore {
    /// Load the stored history. Keys scan back in arrival order; the stable
    /// sort then restores chronological display order.
    pub fn load(backend: Arc<dyn StorageBackend>) -> Result<Self> {
        let mut messages = Vec::new();
        let mut next_seq = 0u64;

        for (key, value) in backend
            .scan_prefix(MSG_PREFIX.as_bytes())
            .map_err(|e| anyhow!(e))?
        {
            let msg: ChatMessage = bincode::deserialize(&value)?;
            if let Some(seq) = parse_seq(&key) {
                next_seq = next_seq.max(seq + 1);
            }
            messages.push(msg);
        }
        messages.sort_by_key(|m| m.timestamp);

        Ok(Self {
            backend,
            messages,
            next_seq,
        })
    }

    /// Current history, timestamp-ordered.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Ids of the non-system entries — the set conflict detection runs on.
    pub fn non_system_ids(&self) -> HashSet<Uuid> {
        self.messages
            .iter()
            .filter(|m| !m.is_system)
            .map(|m| m.id)
            .collect()
    }

    /// Insert one message and re-sort.
    pub fn append(&mut self, msg: ChatMessage) -> Result<()> {
        self.persist(&msg)?;
        self.messages.push(msg);
        self.messages.sort_by_key(|m| m.timestamp);
        Ok(())
    }

    /// Convenience for local informational entries.
    pub fn append_system(&mut self, text: impl Into<String>) -> Result<()> {
        self.append(ChatMessage::system(text))
    }

    /// Merge a remote history into the local one.
    ///
    /// Remote system messages describe remote-local UI events and are dropped.
    /// Remaining messages whose id is already present are skipped, so merging
    /// the same sequence twice inserts nothing the second time. Returns the
    /// number of newly inserted messages.
    pub fn merge(&mut self, incoming: Vec<ChatMessage>) -> Result<usize> {
        let known: HashSet<Uuid> = self.messages.iter().map(|m| m.id).collect();

        let mut inserted = 0usize;
        for msg in incoming {
            if msg.is_system || known.contains(&msg.id) {
                continue;
            }
            self.persist(&msg)?;
            self.messages.push(msg);
            inserted += 1;
        }

        if inserted > 0 {
            self.messages.sort_by_key(|m| m.timestamp);
        }
        Ok(inserted)
    }

    /// Replace all non-system local messages with the non-system subset of
    /// `remote`, keeping local system messages, and append one system note.
    pub fn adopt_remote_history(
        &mut self,
        remote: Vec<ChatMessage>,
        note: impl Into<String>,
    ) -> Result<()> {
        self.messages.retain(|m| m.is_system);
        self.messages
            .extend(remote.into_iter().filter(|m| !m.is_system));
        self.messages.push(ChatMessage::system(note));
        self.messages.sort_by_key(|m| m.timestamp);
        self.rewrite_all()?;
        Ok(())
    }

    fn persist(&mut self, msg: &ChatMessage) -> Result<()> {
        let key = seq_key(self.next_seq);
        self.next_seq += 1;
        let value = bincode::serialize(msg)?;
        self.backend
            .put(key.as_bytes(), &value)
            .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    fn rewrite_all(&mut self) -> Result<()> {
        for (key, _) in self
            .backend
            .scan_prefix(MSG_PREFIX.as_bytes())
            .map_err(|e| anyhow!(e))?
        {
            self.backend.remove(&key).map_err(|e| anyhow!(e))?;
        }
        self.next_seq = 0;
        let snapshot = self.messages.clone();
        for msg in &snapshot {
            self.persist(msg)?;
        }
        self.backend.flush().map_err(|e| anyhow!(e))?;
        Ok(())
    }
}

fn seq_key(seq: u64) -> String {
    format!("{}{:012}", MSG_PREFIX, seq)
}

fn parse_seq(key: &[u8]) -> Option<u64> {
    std::str::from_utf8(key)
        .ok()?
        .strip_prefix(MSG_PREFIX)?
        .parse()
        .ok()
}
