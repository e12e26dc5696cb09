//! Snapshot publish/poll/hot-swap across two simulated instances.

use async_trait::async_trait;
use linebot_sync::{
    MemoryObjectStore, ObjectStore, SnapshotConfig, SnapshotEngine, SnapshotManager, SyncError,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct FileEngine {
    contents: Mutex<Vec<u8>>,
    swaps: Mutex<Vec<PathBuf>>,
}

impl FileEngine {
    fn new(contents: &[u8]) -> Arc<Self> {
        Arc::new(Self {
            contents: Mutex::new(contents.to_vec()),
            swaps: Mutex::new(Vec::new()),
        })
    }

    fn current(&self) -> Vec<u8> {
        self.contents.lock().unwrap().clone()
    }
}

#[async_trait]
impl SnapshotEngine for FileEngine {
    async fn create_snapshot(&self, dest: &Path) -> Result<(), SyncError> {
        tokio::fs::write(dest, self.current()).await?;
        Ok(())
    }

    async fn swap(&self, new_db: &Path) -> Result<(), SyncError> {
        let incoming = tokio::fs::read(new_db).await?;
        *self.contents.lock().unwrap() = incoming;
        self.swaps.lock().unwrap().push(new_db.to_path_buf());
        Ok(())
    }
}

fn config(dir: &Path) -> SnapshotConfig {
    SnapshotConfig {
        key: "snapshots/cache.db.zst".to_string(),
        poll_interval: Duration::from_secs(300),
        lock_key: "locks/leader.json".to_string(),
        lock_ttl: Duration::from_secs(60),
        temp_dir: dir.to_path_buf(),
        db_path: dir.join("cache.db"),
    }
}

#[tokio::test]
async fn follower_tracks_the_published_etag() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryObjectStore::new());

    let leader_engine = FileEngine::new(b"state A");
    let leader = SnapshotManager::new(
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        Arc::clone(&leader_engine) as Arc<dyn SnapshotEngine>,
        config(dir.path()),
        None,
    );
    assert!(leader.try_become_leader().await.unwrap());
    let etag_a = leader.upload().await.unwrap();

    let follower_engine = FileEngine::new(b"");
    let follower = SnapshotManager::new(
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        Arc::clone(&follower_engine) as Arc<dyn SnapshotEngine>,
        config(dir.path()),
        None,
    );

    // First poll applies A.
    assert!(follower.poll_once().await.unwrap());
    assert_eq!(follower.applied_etag().as_deref(), Some(etag_a.as_str()));
    assert_eq!(follower_engine.current(), b"state A");

    // Leader publishes B; the next poll applies it.
    *leader_engine.contents.lock().unwrap() = b"state B".to_vec();
    let etag_b = leader.upload().await.unwrap();
    assert_ne!(etag_a, etag_b);

    assert!(follower.poll_once().await.unwrap());
    assert_eq!(follower.applied_etag().as_deref(), Some(etag_b.as_str()));
    assert_eq!(follower_engine.current(), b"state B");

    // Remote unchanged: the poll is a no-op and the etag stays put.
    assert!(!follower.poll_once().await.unwrap());
    assert_eq!(follower.applied_etag().as_deref(), Some(etag_b.as_str()));

    leader.shutdown().await;
    follower.shutdown().await;
}

#[tokio::test]
async fn swap_candidates_are_uniquely_named() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryObjectStore::new());

    let leader_engine = FileEngine::new(b"one");
    let leader = SnapshotManager::new(
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        leader_engine as Arc<dyn SnapshotEngine>,
        config(dir.path()),
        None,
    );
    assert!(leader.try_become_leader().await.unwrap());

    let follower_engine = FileEngine::new(b"");
    let follower = SnapshotManager::new(
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        Arc::clone(&follower_engine) as Arc<dyn SnapshotEngine>,
        config(dir.path()),
        None,
    );

    leader.upload().await.unwrap();
    assert!(follower.poll_once().await.unwrap());
    leader.upload().await.unwrap();
    assert!(follower.poll_once().await.unwrap());

    let swaps = follower_engine.swaps.lock().unwrap().clone();
    assert_eq!(swaps.len(), 2);
    assert_ne!(swaps[0], swaps[1], "candidates must not collide");
    for path in &swaps {
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("cache_") && name.ends_with(".db"));
    }

    leader.shutdown().await;
    follower.shutdown().await;
}

#[tokio::test]
async fn demoted_instance_cannot_publish() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    let manager = SnapshotManager::new(
        store as Arc<dyn ObjectStore>,
        FileEngine::new(b"x") as Arc<dyn SnapshotEngine>,
        config(dir.path()),
        None,
    );

    assert!(!manager.is_leader());
    assert!(manager.upload().await.is_err());
}
