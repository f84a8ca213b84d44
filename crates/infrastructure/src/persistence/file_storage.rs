//! Key-value storage backed by a single JSON file.
//!
//! The whole map is loaded on first use and rewritten on every change. Writes
//! go to a sibling temp file that is then renamed over the original, so a
//! crash mid-write leaves the previous contents intact.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use sparkle_application::ports::{KeyValueStorage, StorageError};
use tokio::fs;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

type Entries = BTreeMap<String, String>;

/// File-backed [`KeyValueStorage`].
#[derive(Debug)]
pub struct FileKeyValueStorage {
    path: PathBuf,
    cache: Mutex<Option<Entries>>,
}

impl FileKeyValueStorage {
    /// Creates storage at `path`. The file is created on the first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn entries(&self) -> Result<MutexGuard<'_, Option<Entries>>, StorageError> {
        let mut cache = self.cache.lock().await;
        if cache.is_none() {
            *cache = Some(self.read_file().await?);
        }
        Ok(cache)
    }

    async fn read_file(&self) -> Result<Entries, StorageError> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Entries::new()),
            Err(e) => return Err(StorageError::Io(e)),
        };
        match serde_json::from_str(&raw) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Storage file is corrupt; starting empty");
                Ok(Entries::new())
            }
        }
    }

    async fn write_file(&self, entries: &Entries) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }
        let json = to_json_stable(entries)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), keys = entries.len(), "Storage written");
        Ok(())
    }

    /// Applies `change` to a copy of the map and commits it once the file
    /// has been written.
    async fn update<F>(&self, change: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut Entries) -> bool + Send,
    {
        let mut cache = self.entries().await?;
        let mut next = cache.clone().unwrap_or_default();
        if !change(&mut next) {
            return Ok(());
        }
        self.write_file(&next).await?;
        *cache = Some(next);
        Ok(())
    }
}

/// Pretty JSON with 2-space indentation and a trailing newline. Key order is
/// stable because the map is ordered.
fn to_json_stable<T: Serialize>(value: &T) -> Result<String, StorageError> {
    let mut buffer = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"  ");
    let mut serializer = Serializer::with_formatter(&mut buffer, formatter);
    value
        .serialize(&mut serializer)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;

    let mut json =
        String::from_utf8(buffer).map_err(|e| StorageError::Serialization(e.to_string()))?;
    json.push('\n');
    Ok(json)
}

#[async_trait]
impl KeyValueStorage for FileKeyValueStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let cache = self.entries().await?;
        Ok(cache.as_ref().and_then(|entries| entries.get(key).cloned()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string()).as_deref() != Some(value)
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.update(|entries| entries.remove(key).is_some()).await
    }

    async fn multi_get(&self, keys: &[&str]) -> Result<Vec<Option<String>>, StorageError> {
        let cache = self.entries().await?;
        Ok(keys
            .iter()
            .map(|key| cache.as_ref().and_then(|entries| entries.get(*key).cloned()))
            .collect())
    }

    async fn multi_set(&self, pairs: &[(&str, &str)]) -> Result<(), StorageError> {
        self.update(|entries| {
            let mut changed = false;
            for (key, value) in pairs {
                changed |=
                    entries.insert((*key).to_string(), (*value).to_string()).as_deref() != Some(*value);
            }
            changed
        })
        .await
    }

    async fn multi_remove(&self, keys: &[&str]) -> Result<(), StorageError> {
        self.update(|entries| {
            let mut changed = false;
            for key in keys {
                changed |= entries.remove(*key).is_some();
            }
            changed
        })
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn storage(dir: &TempDir) -> FileKeyValueStorage {
        FileKeyValueStorage::new(dir.path().join("state").join("storage.json"))
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);

        assert_eq!(storage.get("anything").await.unwrap(), None);
        assert!(!storage.path().exists());
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        storage(&dir).set("b", "2").await.unwrap();
        storage(&dir).multi_set(&[("a", "1"), ("c", "3")]).await.unwrap();

        let reopened = storage(&dir);
        assert_eq!(
            reopened.multi_get(&["a", "b", "c", "d"]).await.unwrap(),
            vec![
                Some("1".to_string()),
                Some("2".to_string()),
                Some("3".to_string()),
                None
            ]
        );
    }

    #[tokio::test]
    async fn test_file_is_stable_json() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        storage.multi_set(&[("z", "last"), ("a", "first")]).await.unwrap();

        let raw = std::fs::read_to_string(storage.path()).unwrap();
        assert_eq!(raw, "{\n  \"a\": \"first\",\n  \"z\": \"last\"\n}\n");
        assert!(!storage.path().with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_remove() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        storage.multi_set(&[("a", "1"), ("b", "2"), ("c", "3")]).await.unwrap();

        storage.remove("a").await.unwrap();
        storage.multi_remove(&["b", "missing"]).await.unwrap();

        assert_eq!(
            storage.multi_get(&["a", "b", "c"]).await.unwrap(),
            vec![None, None, Some("3".to_string())]
        );
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        std::fs::create_dir_all(storage.path().parent().unwrap()).unwrap();
        std::fs::write(storage.path(), "{not json").unwrap();

        assert_eq!(storage.get("a").await.unwrap(), None);
        storage.set("a", "1").await.unwrap();
        assert_eq!(storage.get("a").await.unwrap(), Some("1".to_string()));
    }

    #[tokio::test]
    async fn test_failed_write_keeps_previous_values() {
        let dir = TempDir::new().unwrap();
        let storage = FileKeyValueStorage::new(dir.path().join("storage.json"));
        storage.set("a", "1").await.unwrap();

        std::fs::create_dir(dir.path().join("storage.tmp")).unwrap();
        assert!(storage.set("a", "2").await.is_err());

        assert_eq!(storage.get("a").await.unwrap(), Some("1".to_string()));
    }
}
