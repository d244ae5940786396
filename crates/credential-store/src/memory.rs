//! In-memory storage backend.

use crate::{SecureStorage, StorageResult, StorageWrite};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Process-local storage. Credentials are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecureStorage for MemoryStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.data.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.data.lock().get(key).cloned())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        Ok(self.data.lock().remove(key).is_some())
    }

    fn write_batch(&self, writes: &[StorageWrite<'_>]) -> StorageResult<()> {
        let mut data = self.data.lock();
        for (key, value) in writes {
            match value {
                Some(value) => {
                    data.insert(key.to_string(), value.to_string());
                }
                None => {
                    data.remove(*key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new();

        storage.set("test_key", "test_value").unwrap();
        assert_eq!(storage.get("test_key").unwrap(), Some("test_value".to_string()));

        assert!(storage.has("test_key").unwrap());
        assert!(!storage.has("nonexistent").unwrap());

        assert!(storage.delete("test_key").unwrap());
        assert!(!storage.delete("test_key").unwrap());
        assert_eq!(storage.get("test_key").unwrap(), None);
    }

    #[test]
    fn test_write_batch_sets_and_deletes() {
        let storage = MemoryStorage::new();
        storage.set("stale", "old").unwrap();

        storage
            .write_batch(&[("a", Some("1")), ("b", Some("2")), ("stale", None)])
            .unwrap();

        assert_eq!(storage.get("a").unwrap().as_deref(), Some("1"));
        assert_eq!(storage.get("b").unwrap().as_deref(), Some("2"));
        assert!(!storage.has("stale").unwrap());
    }
}
