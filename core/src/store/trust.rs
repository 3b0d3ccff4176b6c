// Trust data persistence — known-peer allowlist and blocked-user set
//
// Both sets are small and security-relevant, so every mutation is written
// through and flushed.

use crate::peers::KnownPeer;
use crate::store::backend::StorageBackend;
use anyhow::{anyhow, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

const KNOWN_PREFIX: &str = "known_";
const BLOCKED_PREFIX: &str = "blocked_";

pub struct TrustStore {
    backend: Arc<dyn StorageBackend>,
}

impl TrustStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub fn load_known(&self) -> Result<HashMap<Uuid, KnownPeer>> {
        let mut known = HashMap::new();
        for (_, value) in self
            .backend
            .scan_prefix(KNOWN_PREFIX.as_bytes())
            .map_err(|e| anyhow!(e))?
        {
            let peer: KnownPeer = bincode::deserialize(&value)?;
            known.insert(peer.user_id, peer);
        }
        Ok(known)
    }

    pub fn save_known(&self, peer: &KnownPeer) -> Result<()> {
        let key = format!("{}{}", KNOWN_PREFIX, peer.user_id);
        let value = bincode::serialize(peer)?;
        self.backend
            .put(key.as_bytes(), &value)
            .map_err(|e| anyhow!(e))?;
        self.backend.flush().map_err(|e| anyhow!(e))?;
        Ok(())
    }

    pub fn remove_known(&self, user_id: &Uuid) -> Result<()> {
        let key = format!("{}{}", KNOWN_PREFIX, user_id);
        self.backend
            .remove(key.as_bytes())
            .map_err(|e| anyhow!(e))?;
        self.backend.flush().map_err(|e| anyhow!(e))?;
        Ok(())
    }

    pub fn load_blocked(&self) -> Result<HashSet<Uuid>> {
        let mut blocked = HashSet::new();
        for (key, _) in self
            .backend
            .scan_prefix(BLOCKED_PREFIX.as_bytes())
            .map_err(|e| anyhow!(e))?
        {
            let text = std::str::from_utf8(&key)?;
            if let Some(id) = text.strip_prefix(BLOCKED_PREFIX) {
                blocked.insert(id.parse()?);
            }
        }
        Ok(blocked)
    }

    pub fn add_blocked(&self, user_id: &Uuid) -> Result<()> {
        let key = format!("{}{}", BLOCKED_PREFIX, user_id);
        self.backend
            .put(key.as_bytes(), &[])
            .map_err(|e| anyhow!(e))?;
        self.backend.flush().map_err(|e| anyhow!(e))?;
        Ok(())
    }
}
