//! Configuration key store (§4.4).
//!
//! In-memory ordered list with a map index for O(1) lookup, persisted to a
//! per-station JSON file. Writes go through a per-path scoped lock so that
//! concurrent mutators in the same process serialize instead of racing the
//! rename.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;

use crate::domain::error::{DomainError, DomainResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigurationKey {
    pub key: String,
    pub value: String,
    pub readonly: bool,
    pub visible: bool,
    pub reboot_required: bool,
}

impl ConfigurationKey {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            readonly: false,
            visible: true,
            reboot_required: false,
        }
    }

    pub fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }
}

/// Registry of per-file locks keyed by canonical path, so writers in the
/// same process serialize on the same mutex instead of racing the rename.
fn file_locks() -> &'static DashMap<PathBuf, Arc<AsyncMutex<()>>> {
    static LOCKS: OnceLock<DashMap<PathBuf, Arc<AsyncMutex<()>>>> = OnceLock::new();
    LOCKS.get_or_init(DashMap::new)
}

fn lock_for(path: &Path) -> Arc<AsyncMutex<()>> {
    file_locks()
        .entry(path.to_path_buf())
        .or_insert_with(|| Arc::new(AsyncMutex::new(())))
        .clone()
}

#[derive(Debug)]
pub struct ConfigurationStore {
    ordered: Vec<ConfigurationKey>,
    index: HashMap<String, usize>,
    persist_path: Option<PathBuf>,
}

impl ConfigurationStore {
    pub fn new(persist_path: Option<PathBuf>) -> Self {
        Self {
            ordered: Vec::new(),
            index: HashMap::new(),
            persist_path,
        }
    }

    pub fn with_defaults(persist_path: Option<PathBuf>, defaults: Vec<ConfigurationKey>) -> Self {
        let mut store = Self::new(persist_path);
        for key in defaults {
            store.index.insert(key.key.clone(), store.ordered.len());
            store.ordered.push(key);
        }
        store
    }

    /// Look up a key, optionally case-insensitively (§4.4: unique
    /// case-sensitively, lookup supports a case-insensitive mode).
    pub fn get(&self, key: &str, case_insensitive: bool) -> Option<&ConfigurationKey> {
        if let Some(&idx) = self.index.get(key) {
            return self.ordered.get(idx);
        }
        if case_insensitive {
            return self
                .ordered
                .iter()
                .find(|k| k.key.eq_ignore_ascii_case(key));
        }
        None
    }

    pub fn set(&mut self, key: &str, value: &str) -> DomainResult<()> {
        let idx = *self
            .index
            .get(key)
            .ok_or_else(|| DomainError::UnknownKey(key.to_string()))?;
        let entry = &mut self.ordered[idx];
        if entry.readonly {
            return Err(DomainError::ReadOnly(key.to_string()));
        }
        entry.value = value.to_string();
        Ok(())
    }

    pub fn add(&mut self, entry: ConfigurationKey) {
        if let Some(&idx) = self.index.get(&entry.key) {
            self.ordered[idx] = entry;
        } else {
            self.index.insert(entry.key.clone(), self.ordered.len());
            self.ordered.push(entry);
        }
    }

    pub fn delete(&mut self, key: &str) -> DomainResult<()> {
        let idx = self
            .index
            .remove(key)
            .ok_or_else(|| DomainError::UnknownKey(key.to_string()))?;
        self.ordered.remove(idx);
        for v in self.index.values_mut() {
            if *v > idx {
                *v -= 1;
            }
        }
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<ConfigurationKey> {
        self.ordered.clone()
    }

    /// Persist the current snapshot via write-tmp-then-rename, serialized on
    /// the store's path-scoped lock.
    pub async fn persist(&self) -> DomainResult<()> {
        let Some(path) = self.persist_path.clone() else {
            return Ok(());
        };
        let snapshot = self.snapshot();
        let lock = lock_for(&path);
        let _guard = lock.lock().await;

        let json = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| DomainError::UnknownKey(format!("serialize configuration: {e}")))?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| DomainError::UnknownKey(format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| DomainError::UnknownKey(format!("rename into {}: {e}", path.display())))?;
        Ok(())
    }

    pub async fn load(path: &Path) -> DomainResult<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| DomainError::UnknownKey(format!("read {}: {e}", path.display())))?;
        let keys: Vec<ConfigurationKey> = serde_json::from_slice(&bytes)
            .map_err(|e| DomainError::UnknownKey(format!("parse {}: {e}", path.display())))?;
        Ok(Self::with_defaults(Some(path.to_path_buf()), keys))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ConfigurationStore {
        ConfigurationStore::with_defaults(
            None,
            vec![
                ConfigurationKey::new("HeartbeatInterval", "60"),
                ConfigurationKey::new("AuthorizeRemoteTxRequests", "true").readonly(true),
            ],
        )
    }

    #[test]
    fn set_on_readonly_key_fails() {
        let mut s = store();
        assert!(matches!(
            s.set("AuthorizeRemoteTxRequests", "false"),
            Err(DomainError::ReadOnly(_))
        ));
    }

    #[test]
    fn get_is_case_sensitive_unless_requested() {
        let s = store();
        assert!(s.get("heartbeatinterval", false).is_none());
        assert!(s.get("heartbeatinterval", true).is_some());
    }

    #[test]
    fn delete_reindexes_remaining_keys() {
        let mut s = store();
        s.add(ConfigurationKey::new("NumberOfConnectors", "2"));
        s.delete("HeartbeatInterval").unwrap();
        assert!(s.get("NumberOfConnectors", false).is_some());
        assert_eq!(s.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn persist_and_load_roundtrip() {
        let dir = std::env::temp_dir().join(format!("ocpp-sim-test-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("config.json");

        let mut s = ConfigurationStore::new(Some(path.clone()));
        s.add(ConfigurationKey::new("HeartbeatInterval", "60"));
        s.persist().await.unwrap();

        let loaded = ConfigurationStore::load(&path).await.unwrap();
        assert_eq!(loaded.get("HeartbeatInterval", false).unwrap().value, "60");

        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
