//! File-backed storage.
//!
//! All keys live in a single JSON object. Every write replaces the file
//! through a temporary sibling and a rename, so a reader never observes a
//! half-written batch.

use crate::{SecureStorage, StorageError, StorageResult, StorageWrite};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};

/// JSON map persisted at a fixed path.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    data: Mutex<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Open the storage file, creating nothing until the first write.
    ///
    /// An unreadable or corrupt file is treated as empty and replaced on the
    /// next write.
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        let data = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(map) => map,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Ignoring corrupt credential file");
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };

        debug!(path = %path.display(), keys = data.len(), "Opened credential file");

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `change` to a copy of the map, persist it, then commit in memory.
    fn mutate<R>(&self, change: impl FnOnce(&mut BTreeMap<String, String>) -> R) -> StorageResult<R> {
        let mut data = self.data.lock();
        let mut next = data.clone();
        let result = change(&mut next);
        if next != *data {
            atomic_write(&self.path, &serde_json::to_string_pretty(&next)?)?;
            *data = next;
        }
        Ok(result)
    }
}

impl SecureStorage for FileStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.mutate(|map| {
            map.insert(key.to_string(), value.to_string());
        })
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.data.lock().get(key).cloned())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        self.mutate(|map| map.remove(key).is_some())
    }

    fn write_batch(&self, writes: &[StorageWrite<'_>]) -> StorageResult<()> {
        self.mutate(|map| {
            for (key, value) in writes {
                match value {
                    Some(value) => {
                        map.insert(key.to_string(), value.to_string());
                    }
                    None => {
                        map.remove(*key);
                    }
                }
            }
        })
    }
}

fn atomic_write(path: &Path, content: &str) -> StorageResult<()> {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| StorageError::Backend(format!("invalid storage path {}", path.display())))?;

    fs::create_dir_all(dir)?;

    let tmp_path = dir.join(format!(
        ".{}.tmp.{}",
        file_name,
        std::time::SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    ));

    let write_result = (|| -> std::io::Result<()> {
        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;

        fs::rename(&tmp_path, path)?;

        if let Ok(parent_dir) = fs::File::open(dir) {
            let _ = parent_dir.sync_all();
        }
        Ok(())
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_opens_empty() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::open(dir.path().join("credentials.json")).unwrap();

        assert_eq!(storage.get("access_token").unwrap(), None);
        assert!(!storage.path().exists());
    }

    #[test]
    fn writes_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("credentials.json");

        let storage = FileStorage::open(&path).unwrap();
        storage
            .write_batch(&[("access_token", Some("a1")), ("refresh_token", Some("r1"))])
            .unwrap();
        storage.set("user_profile", "{}").unwrap();
        assert!(storage.delete("refresh_token").unwrap());

        let reopened = FileStorage::open(&path).unwrap();
        assert_eq!(reopened.get("access_token").unwrap().as_deref(), Some("a1"));
        assert_eq!(reopened.get("user_profile").unwrap().as_deref(), Some("{}"));
        assert_eq!(reopened.get("refresh_token").unwrap(), None);
    }

    #[test]
    fn no_temp_files_left_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let storage = FileStorage::open(&path).unwrap();
        storage.set("k", "v").unwrap();
        storage.set("k", "w").unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("credentials.json")]);
    }

    #[test]
    fn corrupt_file_is_treated_as_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        fs::write(&path, "{not json").unwrap();

        let storage = FileStorage::open(&path).unwrap();
        assert_eq!(storage.get("access_token").unwrap(), None);

        storage.set("access_token", "fresh").unwrap();
        let reopened = FileStorage::open(&path).unwrap();
        assert_eq!(reopened.get("access_token").unwrap().as_deref(), Some("fresh"));
    }

    #[cfg(unix)]
    #[test]
    fn file_is_private_to_owner() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let storage = FileStorage::open(&path).unwrap();
        storage.set("access_token", "secret").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
