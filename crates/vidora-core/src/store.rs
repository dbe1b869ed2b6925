//! Continue-watching persistence
//!
//! One storage key per namespace; the value is a JSON array of
//! [`ProgressRecord`]s, newest first. Storage failures never reach the
//! caller: the store logs them and keeps serving an in-memory copy.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::types::{ContinueWatchingList, Namespace, ProgressRecord};
use crate::{Error, Result};

/// Durable key/value storage
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-process storage with an optional byte quota
#[derive(Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject writes whose value exceeds `bytes`
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            quota_bytes: Some(bytes),
        }
    }

    /// Write a raw value, bypassing the quota
    pub fn put_raw(&self, key: &str, value: &str) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
    }
}

impl StorageBackend for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if self.quota_bytes.is_some_and(|quota| value.len() > quota) {
            return Err(Error::QuotaExceeded {
                key: key.to_string(),
            });
        }
        self.put_raw(key, value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }
}

/// One JSON file per key inside a directory
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Storage under the platform data directory
    pub fn default_location() -> Result<Self> {
        let base = dirs::data_dir()
            .ok_or_else(|| Error::StorageUnavailable("unable to resolve data directory".into()))?;
        Ok(Self::new(base.join("vidora")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Percent-encoded key, so distinct keys never share a file
    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", urlencoding::encode(key)))
    }
}

impl StorageBackend for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// Published after every successful mutation
#[derive(Debug, Clone, PartialEq)]
pub struct StoreUpdate {
    pub namespace: Namespace,
    pub records: ContinueWatchingList,
}

/// Per-namespace continue-watching lists
pub struct ProgressStore {
    storage: std::sync::Arc<dyn StorageBackend>,
    config: StoreConfig,
    /// Lists for namespaces whose storage is currently failing
    fallback: Mutex<HashMap<Namespace, ContinueWatchingList>>,
    updates: broadcast::Sender<StoreUpdate>,
}

impl ProgressStore {
    pub fn new(storage: std::sync::Arc<dyn StorageBackend>, config: StoreConfig) -> Self {
        let (updates, _) = broadcast::channel(32);
        Self {
            storage,
            config,
            fallback: Mutex::new(HashMap::new()),
            updates,
        }
    }

    /// Store backed by [`MemoryStorage`] with default settings
    pub fn in_memory() -> Self {
        Self::new(std::sync::Arc::new(MemoryStorage::new()), StoreConfig::default())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreUpdate> {
        self.updates.subscribe()
    }

    /// Whether `namespace` is being served from memory after a storage failure
    pub fn is_degraded(&self, namespace: &Namespace) -> bool {
        self.fallback().contains_key(namespace)
    }

    fn fallback(&self) -> MutexGuard<'_, HashMap<Namespace, ContinueWatchingList>> {
        self.fallback.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn key(&self, namespace: &Namespace) -> String {
        namespace.storage_key(&self.config.key_prefix)
    }

    /// Records for `namespace`, newest first. Absent, empty or malformed
    /// storage yields an empty list.
    pub fn load(&self, namespace: &Namespace) -> ContinueWatchingList {
        if let Some(list) = self.fallback().get(namespace) {
            return list.clone();
        }

        let key = self.key(namespace);
        let raw = match self.storage.get(&key) {
            Ok(Some(raw)) if !raw.trim().is_empty() => raw,
            Ok(_) => return ContinueWatchingList::new(),
            Err(e) => {
                warn!(key = %key, error = %e, "Continue-watching storage unreadable");
                return ContinueWatchingList::new();
            }
        };

        match serde_json::from_str::<Vec<ProgressRecord>>(&raw) {
            Ok(records) => {
                let mut list = ContinueWatchingList::from_records(records);
                if list.len() > self.config.capacity {
                    list = ContinueWatchingList::from_records(
                        list.into_vec().into_iter().take(self.config.capacity).collect(),
                    );
                }
                list
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Malformed continue-watching data ignored");
                ContinueWatchingList::new()
            }
        }
    }

    /// Record for one video, if present
    pub fn get(&self, namespace: &Namespace, video_id: &str) -> Option<ProgressRecord> {
        self.load(namespace).get(video_id).cloned()
    }

    /// Upsert `record` at the front of the namespace's list
    pub fn save(&self, namespace: &Namespace, record: ProgressRecord) -> ContinueWatchingList {
        let record = record.normalized();
        debug!(
            namespace = %namespace,
            video_id = %record.video_id,
            position = record.current_time_seconds,
            ended = record.ended,
            "Saving progress"
        );

        let mut list = self.load(namespace);
        list.upsert(record, self.config.capacity);
        self.persist(namespace, &list);
        list
    }

    /// Drop a video's record. Returns whether anything was removed.
    pub fn remove(&self, namespace: &Namespace, video_id: &str) -> bool {
        let mut list = self.load(namespace);
        if !list.remove(video_id) {
            return false;
        }
        debug!(namespace = %namespace, video_id = %video_id, "Removed progress record");
        self.persist(namespace, &list);
        true
    }

    fn persist(&self, namespace: &Namespace, list: &ContinueWatchingList) {
        let key = self.key(namespace);
        let written = serde_json::to_string(list)
            .map_err(Error::from)
            .and_then(|json| self.storage.set(&key, &json));

        match written {
            Ok(()) => {
                self.fallback().remove(namespace);
            }
            Err(e) => {
                warn!(
                    key = %key,
                    error = %e,
                    code = e.error_code(),
                    "Continue-watching write failed, keeping list in memory"
                );
                self.fallback().insert(namespace.clone(), list.clone());
            }
        }

        let _ = self.updates.send(StoreUpdate {
            namespace: namespace.clone(),
            records: list.clone(),
        });
    }
}
