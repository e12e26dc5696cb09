//! The storage-engine contract.
//!
//! The embedded relational engine is an external collaborator; the
//! service drives it exclusively through [`CacheStore`]. The in-memory
//! implementation here backs tests and single-node runs; a production
//! engine plugs in behind the same trait.

use async_trait::async_trait;
use linebot_sync::{SnapshotEngine, SyncError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

/// Error from the storage engine.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("unknown namespace {0}")]
    UnknownNamespace(String),
    #[error("store is closed")]
    Closed,
}

/// The engine surface the runtime core needs.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// True once the store can serve reads.
    async fn ready(&self) -> bool;

    /// The cache namespaces this store manages.
    fn namespaces(&self) -> Vec<String>;

    /// Number of live records in a namespace.
    async fn count(&self, namespace: &str) -> Result<u64, StorageError>;

    /// Removes records older than `ttl`; returns how many went.
    async fn delete_expired(&self, namespace: &str, ttl: Duration)
        -> Result<u64, StorageError>;

    /// Reclaims space after deletions.
    async fn compact(&self) -> Result<(), StorageError>;

    /// Writes a consistent snapshot of the whole store to `dest`.
    async fn create_snapshot(&self, dest: &Path) -> Result<(), StorageError>;

    /// Atomically adopts the database file at `new_db`.
    async fn swap(&self, new_db: &Path) -> Result<(), StorageError>;

    /// Flushes and closes the store.
    async fn close(&self) -> Result<(), StorageError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Record {
    value: serde_json::Value,
    inserted_at: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Tables {
    namespaces: HashMap<String, HashMap<String, Record>>,
}

/// In-memory [`CacheStore`] persisted as JSON at a file path, so
/// snapshot/swap behave like the real engine's file operations.
pub struct MemoryCacheStore {
    path: PathBuf,
    tables: RwLock<Tables>,
    closed: std::sync::atomic::AtomicBool,
}

const NAMESPACES: &[&str] = &["course", "id", "contact", "sticker"];

impl MemoryCacheStore {
    /// Opens the store, loading any previous contents at `path` (for
    /// example a restored snapshot).
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let tables = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => Tables::default(),
        };
        Ok(Self {
            path,
            tables: RwLock::new(tables),
            closed: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// Inserts a record stamped with the current time.
    pub fn put(
        &self,
        namespace: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), StorageError> {
        self.ensure_namespace(namespace)?;
        let mut tables = self.tables.write().unwrap();
        tables
            .namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(
                key.to_string(),
                Record {
                    value,
                    inserted_at: chrono::Utc::now().timestamp(),
                },
            );
        Ok(())
    }

    /// Fetches a record's value.
    pub fn get(&self, namespace: &str, key: &str) -> Option<serde_json::Value> {
        let tables = self.tables.read().unwrap();
        tables
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .map(|r| r.value.clone())
    }

    fn ensure_namespace(&self, namespace: &str) -> Result<(), StorageError> {
        if NAMESPACES.contains(&namespace) {
            Ok(())
        } else {
            Err(StorageError::UnknownNamespace(namespace.to_string()))
        }
    }

    fn check_open(&self) -> Result<(), StorageError> {
        if self.closed.load(std::sync::atomic::Ordering::SeqCst) {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn ready(&self) -> bool {
        !self.closed.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn namespaces(&self) -> Vec<String> {
        NAMESPACES.iter().map(|s| s.to_string()).collect()
    }

    async fn count(&self, namespace: &str) -> Result<u64, StorageError> {
        self.check_open()?;
        self.ensure_namespace(namespace)?;
        let tables = self.tables.read().unwrap();
        Ok(tables
            .namespaces
            .get(namespace)
            .map(|ns| ns.len() as u64)
            .unwrap_or(0))
    }

    async fn delete_expired(
        &self,
        namespace: &str,
        ttl: Duration,
    ) -> Result<u64, StorageError> {
        self.check_open()?;
        self.ensure_namespace(namespace)?;
        let cutoff = chrono::Utc::now().timestamp() - ttl.as_secs() as i64;
        let mut tables = self.tables.write().unwrap();
        let Some(ns) = tables.namespaces.get_mut(namespace) else {
            return Ok(0);
        };
        let before = ns.len();
        ns.retain(|_, record| record.inserted_at > cutoff);
        Ok((before - ns.len()) as u64)
    }

    async fn compact(&self) -> Result<(), StorageError> {
        self.check_open()?;
        let bytes = {
            let tables = self.tables.read().unwrap();
            serde_json::to_vec(&*tables)?
        };
        tokio::fs::write(&self.path, bytes).await?;
        Ok(())
    }

    async fn create_snapshot(&self, dest: &Path) -> Result<(), StorageError> {
        self.check_open()?;
        let bytes = {
            let tables = self.tables.read().unwrap();
            serde_json::to_vec(&*tables)?
        };
        tokio::fs::write(dest, bytes).await?;
        Ok(())
    }

    async fn swap(&self, new_db: &Path) -> Result<(), StorageError> {
        self.check_open()?;
        let bytes = tokio::fs::read(new_db).await?;
        let incoming: Tables = serde_json::from_slice(&bytes)?;
        *self.tables.write().unwrap() = incoming;
        tokio::fs::rename(new_db, &self.path).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        let bytes = {
            let tables = self.tables.read().unwrap();
            serde_json::to_vec(&*tables)?
        };
        tokio::fs::write(&self.path, bytes).await?;
        self.closed
            .store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

/// Adapts a [`CacheStore`] to the snapshot manager's engine trait.
pub struct EngineAdapter(pub std::sync::Arc<dyn CacheStore>);

#[async_trait]
impl SnapshotEngine for EngineAdapter {
    async fn create_snapshot(&self, dest: &Path) -> Result<(), SyncError> {
        self.0
            .create_snapshot(dest)
            .await
            .map_err(|e| SyncError::Engine(e.to_string()))
    }

    async fn swap(&self, new_db: &Path) -> Result<(), SyncError> {
        self.0
            .swap(new_db)
            .await
            .map_err(|e| SyncError::Engine(e.to_string()))
    }
}
