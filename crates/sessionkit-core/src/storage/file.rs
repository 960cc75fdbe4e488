use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, warn};

use super::KeyValueStorage;

/// Storage file name in cache directory
pub const STORAGE_FILE: &str = "session.json";

/// A flat string map persisted as one JSON document.
///
/// Every write replaces the whole file through a temp file and rename, so a
/// reader sees either the previous document or the new one.
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    /// Storage rooted in `cache_dir`, using the standard file name
    pub fn in_dir(cache_dir: &Path) -> Self {
        Self::new(cache_dir.join(STORAGE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_contents(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)
            .context("Failed to read storage file")?;
        Ok(Some(contents))
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>> {
        match self.read_contents()? {
            Some(contents) => serde_json::from_str(&contents).context("Failed to parse storage file"),
            None => Ok(BTreeMap::new()),
        }
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<()> {
        if map.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path).context("Failed to remove storage file")?;
            }
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(map)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents).context("Failed to write storage file")?;
        std::fs::rename(&tmp, &self.path).context("Failed to replace storage file")?;
        debug!(path = ?self.path, entries = map.len(), "Storage file written");
        Ok(())
    }

    fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> bool,
    {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow!("File storage lock poisoned"))?;
        let (mut map, corrupt): (BTreeMap<String, String>, bool) = match self.read_contents()? {
            Some(contents) => match serde_json::from_str(&contents) {
                Ok(map) => (map, false),
                Err(e) => {
                    warn!(error = %e, path = ?self.path, "Storage file is corrupt, starting over");
                    (BTreeMap::new(), true)
                }
            },
            None => (BTreeMap::new(), false),
        };
        if f(&mut map) || corrupt {
            self.write_map(&map)?;
        }
        Ok(())
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_map()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.set_entries(&[(key, value)])
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.remove_entries(&[key])
    }

    fn set_entries(&self, entries: &[(&str, &str)]) -> Result<()> {
        self.update(|map| {
            for (key, value) in entries {
                map.insert(key.to_string(), value.to_string());
            }
            true
        })
    }

    fn remove_entries(&self, keys: &[&str]) -> Result<()> {
        self.update(|map| {
            let before = map.len();
            for key in keys {
                map.remove(*key);
            }
            map.len() != before
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::in_dir(dir.path());
        storage
            .set_entries(&[("token", "abc"), ("user", r#"{"id":1}"#)])
            .unwrap();

        let reopened = FileStorage::in_dir(dir.path());
        assert_eq!(reopened.get("token").unwrap().as_deref(), Some("abc"));
        assert_eq!(reopened.get("user").unwrap().as_deref(), Some(r#"{"id":1}"#));
        assert!(!dir.path().join("session.json.tmp").exists());
    }

    #[test]
    fn test_remove_last_entries_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::in_dir(dir.path());
        storage.set("token", "abc").unwrap();
        storage.set("other", "keep").unwrap();

        storage.remove_entries(&["token"]).unwrap();
        assert!(storage.path().exists());
        assert_eq!(storage.get("other").unwrap().as_deref(), Some("keep"));

        storage.remove("other").unwrap();
        assert!(!storage.path().exists());

        // Idempotent on a missing file
        storage.remove("other").unwrap();
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::in_dir(&dir.path().join("nested"));
        assert_eq!(storage.get("token").unwrap(), None);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::in_dir(dir.path());
        std::fs::write(storage.path(), "not json").unwrap();
        assert!(storage.get("token").is_err());
    }

    #[test]
    fn test_write_replaces_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::in_dir(dir.path());
        std::fs::write(storage.path(), "garbage").unwrap();

        storage.set_entries(&[("token", "abc")]).unwrap();
        assert_eq!(storage.get("token").unwrap().as_deref(), Some("abc"));
    }

    #[test]
    fn test_remove_deletes_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::in_dir(dir.path());
        std::fs::write(storage.path(), "{\"token\": 5}").unwrap();

        storage.remove_entries(&["token", "user"]).unwrap();
        assert!(!storage.path().exists());
        assert_eq!(storage.get("token").unwrap(), None);
    }
}
