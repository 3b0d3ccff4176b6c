// Storage abstraction — the persistence boundary the core talks to.
//
// The core never touches sled directly; every store goes through this trait
// so tests run on MemoryStorage and real deployments on SledStorage.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Key-value persistence seam. Values are opaque encoded bytes; the caller
/// owns the encoding.
pub trait StorageBackend: Send + Sync {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), String>;
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, String>;
    fn remove(&self, key: &[u8]) -> Result<(), String>;
    /// All entries whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, String>;
    fn flush(&self) -> Result<(), String>;
}

/// In-memory backend for tests and throwaway cores.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryStorage {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), String> {
        self.entries.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, String> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn remove(&self, key: &[u8]) -> Result<(), String> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, String> {
        Ok(self
            .entries
            .read()
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn flush(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Sled-backed persistent storage.
pub struct SledStorage {
    db: sled::Db,
}

impl SledStorage {
    pub fn open(path: &str) -> Result<Self, String> {
        let db = sled::open(path).map_err(|e| e.to_string())?;
        Ok(Self { db })
    }
}

impl StorageBackend for SledStorage {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), String> {
        self.db.insert(key, value).map_err(|e| e.to_string())?;
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, String> {
        Ok(self
            .db
            .get(key)
            .map_err(|e| e.to_string())?
            .map(|ivec| ivec.to_vec()))
    }

    fn remove(&self, key: &[u8]) -> Result<(), String> {
        self.db.remove(key).map_err(|e| e.to_string())?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, String> {
        let mut out = Vec::new();
        for item in self.db.scan_prefix(prefix) {
            let (k, v) = item.map_err(|e| e.to_string())?;
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }

    fn flush(&self) -> Result<(), String> {
        self.db.flush().map_err(|e| e.to_string())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn memory_roundtrip_and_scan_order() {
        let storage = MemoryStorage::new();
        storage.put(b"msg_b", b"2").unwrap();
        storage.put(b"msg_a", b"1").unwrap();
        storage.put(b"known_x", b"3").unwrap();

        assert_eq!(storage.get(b"msg_a").unwrap(), Some(b"1".to_vec()));

        let scanned = storage.scan_prefix(b"msg_").unwrap();
        assert_eq!(scanned.len(), 2);
        assert_eq!(scanned[0].0, b"msg_a".to_vec());

        storage.remove(b"msg_a").unwrap();
        assert!(storage.get(b"msg_a").unwrap().is_none());
    }

    #[test]
    fn sled_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db").to_string_lossy().to_string();

        {
            let storage = SledStorage::open(&path).unwrap();
            storage.put(b"key", b"value").unwrap();
            storage.flush().unwrap();
        }

        let reopened = SledStorage::open(&path).unwrap();
        assert_eq!(reopened.get(b"key").unwrap(), Some(b"value".to_vec()));
    }
}
