// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Durable dedup ledger of notification ids already shown to the user.
//!
//! Stored as one JSON array under [`LEDGER_KEY`]. Ids are only ever added:
//! a notification leaving the live view (marked read, deleted) stays in the
//! ledger so a later re-delivery cannot surface it again.

use crate::client::ClientError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Storage key of the ledger.
pub const LEDGER_KEY: &str = "shownNotifications";

/// Key/value storage that survives page unloads and restarts.
#[async_trait]
pub trait DurableStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, ClientError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), ClientError>;
}

#[async_trait]
impl<T: DurableStorage + ?Sized> DurableStorage for Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<String>, ClientError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), ClientError> {
        (**self).set(key, value).await
    }
}

/// One file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", urlencoding::encode(key)))
    }
}

#[async_trait]
impl DurableStorage for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, ClientError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ClientError::Storage(e.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), ClientError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ClientError::Storage(e.to_string()))?;

        // Write then rename, so a crash never leaves a truncated ledger
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value)
            .await
            .map_err(|e| ClientError::Storage(e.to_string()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| ClientError::Storage(e.to_string()))
    }
}

/// Process-local storage, for tests and hosts without a disk.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, ClientError> {
        let values = self
            .values
            .lock()
            .map_err(|_| ClientError::Storage("storage lock poisoned".to_string()))?;
        Ok(values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), ClientError> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| ClientError::Storage("storage lock poisoned".to_string()))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// The set `Shown`, in insertion order.
pub struct DedupLedger<S> {
    storage: S,
    order: VecDeque<String>,
    ids: HashSet<String>,
    /// Keep at most this many ids, evicting the oldest. `None` = unbounded.
    cap: Option<usize>,
}

impl<S: DurableStorage> DedupLedger<S> {
    /// Load the ledger from storage.
    ///
    /// A missing entry is an empty ledger. Unreadable contents are logged and
    /// replaced by an empty ledger rather than failing the session.
    pub async fn load(storage: S) -> Result<Self, ClientError> {
        let ids: Vec<String> = match storage.get(LEDGER_KEY).await? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Discarding unreadable notification ledger");
                Vec::new()
            }),
            None => Vec::new(),
        };

        let mut ledger = Self {
            storage,
            order: VecDeque::with_capacity(ids.len()),
            ids: HashSet::with_capacity(ids.len()),
            cap: None,
        };
        for id in ids {
            if ledger.ids.insert(id.clone()) {
                ledger.order.push_back(id);
            }
        }
        Ok(ledger)
    }

    /// Bound the ledger size. Applies from the next insertion on.
    pub fn with_cap(mut self, cap: usize) -> Self {
        self.cap = Some(cap.max(1));
        self
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Record `id` and persist the whole ledger.
    ///
    /// Returns false without touching storage when `id` was already present.
    pub async fn insert_and_persist(&mut self, id: &str) -> Result<bool, ClientError> {
        if !self.ids.insert(id.to_string()) {
            return Ok(false);
        }
        self.order.push_back(id.to_string());

        if let Some(cap) = self.cap {
            while self.order.len() > cap {
                if let Some(evicted) = self.order.pop_front() {
                    self.ids.remove(&evicted);
                }
            }
        }

        let encoded = serde_json::to_string(&self.order)?;
        self.storage.set(LEDGER_KEY, &encoded).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_persists_json_array() {
        let storage = Arc::new(MemoryStorage::new());
        let mut ledger = DedupLedger::load(Arc::clone(&storage)).await.unwrap();

        assert!(ledger.insert_and_persist("n1").await.unwrap());
        assert!(ledger.insert_and_persist("n2").await.unwrap());
        assert!(!ledger.insert_and_persist("n1").await.unwrap());

        let raw = storage.get(LEDGER_KEY).await.unwrap().unwrap();
        assert_eq!(raw, r#"["n1","n2"]"#);
    }

    #[tokio::test]
    async fn test_ledger_survives_reload_from_disk() {
        let dir = tempfile::tempdir().unwrap();

        let mut ledger = DedupLedger::load(FileStorage::new(dir.path())).await.unwrap();
        ledger.insert_and_persist("a1_u2").await.unwrap();
        drop(ledger);

        let reloaded = DedupLedger::load(FileStorage::new(dir.path())).await.unwrap();
        assert!(reloaded.contains("a1_u2"));
        assert_eq!(reloaded.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_ledger_starts_empty() {
        let storage = MemoryStorage::new();
        storage.set(LEDGER_KEY, "{not json").await.unwrap();

        let ledger = DedupLedger::load(storage).await.unwrap();
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn test_cap_evicts_oldest() {
        let mut ledger = DedupLedger::load(MemoryStorage::new())
            .await
            .unwrap()
            .with_cap(2);

        for id in ["n1", "n2", "n3"] {
            ledger.insert_and_persist(id).await.unwrap();
        }

        assert!(!ledger.contains("n1"));
        assert!(ledger.contains("n2"));
        assert!(ledger.contains("n3"));
    }
}
