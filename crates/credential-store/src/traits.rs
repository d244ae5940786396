//! Storage trait definitions.

use crate::StorageResult;

/// A single key write inside a batch. `None` deletes the key.
pub type StorageWrite<'a> = (&'a str, Option<&'a str>);

/// Trait for credential storage backends
pub trait SecureStorage: Send + Sync {
    /// Store a value
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Retrieve a value
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Delete a value
    fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Check if a key exists
    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Apply several writes as one unit.
    ///
    /// The default applies them one at a time; backends that can make the
    /// whole batch visible at once should override it.
    fn write_batch(&self, writes: &[StorageWrite<'_>]) -> StorageResult<()> {
        for (key, value) in writes {
            match value {
                Some(value) => self.set(key, value)?,
                None => {
                    self.delete(key)?;
                }
            }
        }
        Ok(())
    }
}
