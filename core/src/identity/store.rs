// Identity persistence — fixed keys on the storage backend

use super::LocalIdentity;
use crate::store::backend::StorageBackend;
use anyhow::{anyhow, Result};
use std::sync::Arc;

const IDENTITY_KEY: &[u8] = b"local_identity";
const DISPLAY_NAME_KEY: &[u8] = b"display_name";

pub struct IdentityStore {
    backend: Arc<dyn StorageBackend>,
}

impl IdentityStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub fn save_identity(&self, identity: &LocalIdentity) -> Result<()> {
        let bytes = bincode::serialize(identity)?;
        self.backend
            .put(IDENTITY_KEY, &bytes)
            .map_err(|e| anyhow!(e))?;
        self.backend.flush().map_err(|e| anyhow!(e))?;
        Ok(())
    }

    pub fn load_identity(&self) -> Result<Option<LocalIdentity>> {
        match self.backend.get(IDENTITY_KEY).map_err(|e| anyhow!(e))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn save_display_name(&self, name: &str) -> Result<()> {
        self.backend
            .put(DISPLAY_NAME_KEY, name.as_bytes())
            .map_err(|e| anyhow!(e))?;
        self.backend.flush().map_err(|e| anyhow!(e))?;
        Ok(())
    }

    pub fn load_display_name(&self) -> Result<Option<String>> {
        match self.backend.get(DISPLAY_NAME_KEY).map_err(|e| anyhow!(e))? {
            Some(bytes) => Ok(Some(String::from_utf8(bytes)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::backend::MemoryStorage;
    use uuid::Uuid;

    #[test]
    fn test_identity_roundtrip() {
        let backend = Arc::new(MemoryStorage::new());
        let store = IdentityStore::new(backend.clone());

        let identity = LocalIdentity {
            device_id: "device-1".into(),
            user_id: Uuid::new_v4(),
        };
        store.save_identity(&identity).unwrap();

        let loaded = IdentityStore::new(backend).load_identity().unwrap().unwrap();
        assert_eq!(loaded.device_id, "device-1");
        assert_eq!(loaded.user_id, identity.user_id);
    }

    #[test]
    fn test_display_name_roundtrip() {
        let store = IdentityStore::new(Arc::new(MemoryStorage::new()));
        assert!(store.load_display_name().unwrap().is_none());

        store.save_display_name("Alice's laptop").unwrap();
        assert_eq!(
            store.load_display_name().unwrap().as_deref(),
            Some("Alice's laptop")
        );
    }
}
