// Local identity — stable device token and logical user id
//
// The identity is minted once and survives restarts. It is never regenerated
// implicitly; `rotate()` is the only path to a fresh identity, and changing
// the display name deliberately does not touch it.

mod store;

pub use store::IdentityStore;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The persisted pair identifying this process on the network.
///
/// `device_id` is the transport-level token for this installation;
/// `user_id` is the logical person and is shared across their devices'
/// advertised metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalIdentity {
    pub device_id: String,
    pub user_id: Uuid,
}

pub struct IdentityManager {
    store: IdentityStore,
    identity: LocalIdentity,
    display_name: String,
}

impl IdentityManager {
    /// Load the persisted identity, minting one on first run.
    pub fn load_or_create(store: IdentityStore, default_name: &str) -> Result<Self> {
        let identity = match store.load_identity()? {
            Some(existing) => {
                tracing::info!(device_id = %existing.device_id, "loaded existing identity");
                existing
            }
            None => {
                let fresh = LocalIdentity {
                    device_id: Uuid::new_v4().to_string(),
                    user_id: Uuid::new_v4(),
                };
                store.save_identity(&fresh)?;
                tracing::info!(device_id = %fresh.device_id, "minted new identity");
                fresh
            }
        };

        let display_name = match store.load_display_name()? {
            Some(name) => name,
            None => {
                store.save_display_name(default_name)?;
                default_name.to_string()
            }
        };

        Ok(Self {
            store,
            identity,
            display_name,
        })
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    pub fn device_id(&self) -> &str {
        &self.identity.device_id
    }

    pub fn user_id(&self) -> Uuid {
        self.identity.user_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Persist a new display name. The identity itself is untouched.
    pub fn set_display_name(&mut self, name: String) -> Result<()> {
        self.store.save_display_name(&name)?;
        self.display_name = name;
        Ok(())
    }

    /// Mint and persist a fresh identity. Deliberate user action only.
    pub fn rotate(&mut self) -> Result<&LocalIdentity> {
        let fresh = LocalIdentity {
            device_id: Uuid::new_v4().to_string(),
            user_id: Uuid::new_v4(),
        };
        self.store.save_identity(&fresh)?;
        tracing::info!(device_id = %fresh.device_id, "rotated identity");
        self.identity = fresh;
        Ok(&self.identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::backend::MemoryStorage;
    use std::sync::Arc;

    fn manager() -> IdentityManager {
        let store = IdentityStore::new(Arc::new(MemoryStorage::new()));
        IdentityManager::load_or_create(store, "test-device").unwrap()
    }

    #[test]
    fn test_first_run_mints_identity() {
        let mgr = manager();
        assert!(!mgr.device_id().is_empty());
        assert_ne!(mgr.user_id(), Uuid::nil());
        assert_eq!(mgr.display_name(), "test-device");
    }

    #[test]
    fn test_identity_stable_across_reload() {
        let backend = Arc::new(MemoryStorage::new());
        let first =
            IdentityManager::load_or_create(IdentityStore::new(backend.clone()), "dev").unwrap();
        let original = first.identity().clone();
        drop(first);

        let second = IdentityManager::load_or_create(IdentityStore::new(backend), "dev").unwrap();
        assert_eq!(second.identity(), &original);
    }

    #[test]
    fn test_display_name_change_keeps_identity() {
        let mut mgr = manager();
        let before = mgr.identity().clone();
        mgr.set_display_name("renamed".into()).unwrap();

        assert_eq!(mgr.display_name(), "renamed");
        assert_eq!(mgr.identity(), &before);
    }

    #[test]
    fn test_rotate_changes_both_ids() {
        let mut mgr = manager();
        let before = mgr.identity().clone();
        mgr.rotate().unwrap();

        assert_ne!(mgr.device_id(), before.device_id);
        assert_ne!(mgr.user_id(), before.user_id);
    }
}
