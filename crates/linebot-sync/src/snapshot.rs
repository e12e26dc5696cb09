use crate::error::SyncError;
use crate::lock::LeaderLock;
use crate::store::ObjectStore;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const SNAPSHOT_CONTENT_TYPE: &str = "application/zstd";
const COMPRESSION_LEVEL: i32 = 8;

/// The storage-engine surface the snapshot manager needs.
#[async_trait]
pub trait SnapshotEngine: Send + Sync {
    /// Writes a consistent snapshot of the live database to `dest`.
    async fn create_snapshot(&self, dest: &Path) -> Result<(), SyncError>;

    /// Atomically replaces the live database with the file at `new_db`.
    async fn swap(&self, new_db: &Path) -> Result<(), SyncError>;
}

/// Configuration for snapshot distribution.
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// Object key the compressed snapshot lives under.
    pub key: String,
    /// Follower poll cadence.
    pub poll_interval: Duration,
    /// Object key of the leader lock.
    pub lock_key: String,
    /// Leader lock TTL.
    pub lock_ttl: Duration,
    /// Directory for compression/download scratch files.
    pub temp_dir: PathBuf,
    /// Path of the live database file; swap candidates are written next
    /// to it.
    pub db_path: PathBuf,
}

/// Downloads and decompresses the published snapshot onto `db_path`.
///
/// Runs before the storage engine opens the file, so there is nothing to
/// swap yet. Returns the applied ETag, or `None` when no snapshot has
/// been published.
pub async fn restore_snapshot(
    store: &dyn ObjectStore,
    key: &str,
    db_path: &Path,
    temp_dir: &Path,
) -> Result<Option<String>, SyncError> {
    let scratch = scratch_path(temp_dir, "restore");
    let etag = match store.download_to(key, &scratch).await {
        Ok(etag) => etag,
        Err(SyncError::NotFound) => return Ok(None),
        Err(err) => return Err(err),
    };

    let result = decompress_file(&scratch, db_path).await;
    let _ = tokio::fs::remove_file(&scratch).await;
    result?;

    tracing::info!(key, etag = %etag, "restored published snapshot");
    Ok(Some(etag))
}

/// Publishes and applies database snapshots.
///
/// The leader compresses and uploads; followers poll the key's ETag and
/// hot-swap when it moves. The applied ETag only advances on a successful
/// swap, so the engine state and the recorded version never diverge.
pub struct SnapshotManager {
    store: Arc<dyn ObjectStore>,
    engine: Arc<dyn SnapshotEngine>,
    cfg: SnapshotConfig,
    lock: Arc<LeaderLock>,
    applied: RwLock<Option<String>>,
    leader: AtomicBool,
    cancel: CancellationToken,
    renew_task: Mutex<Option<JoinHandle<()>>>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl SnapshotManager {
    /// Creates a manager. `initial_etag` is whatever
    /// [`restore_snapshot`] applied before the engine opened.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        engine: Arc<dyn SnapshotEngine>,
        cfg: SnapshotConfig,
        initial_etag: Option<String>,
    ) -> Arc<Self> {
        let lock = Arc::new(LeaderLock::new(
            Arc::clone(&store),
            cfg.lock_key.clone(),
            cfg.lock_ttl,
        ));
        Arc::new(Self {
            store,
            engine,
            cfg,
            lock,
            applied: RwLock::new(initial_etag),
            leader: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            renew_task: Mutex::new(None),
            poll_task: Mutex::new(None),
        })
    }

    /// The last ETag acknowledged by a successful swap or restore.
    pub fn applied_etag(&self) -> Option<String> {
        self.applied.read().unwrap().clone()
    }

    /// True while this instance holds the leader lock.
    pub fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    /// Attempts to become the leader. On success a renew loop keeps the
    /// lock alive; losing a renew demotes this instance until the next
    /// attempt.
    pub async fn try_become_leader(self: &Arc<Self>) -> Result<bool, SyncError> {
        if self.is_leader() {
            return Ok(true);
        }
        if !self.lock.acquire().await? {
            return Ok(false);
        }
        self.leader.store(true, Ordering::SeqCst);

        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.lock.renew_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = manager.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match manager.lock.renew().await {
                            Ok(true) => {}
                            Ok(false) => {
                                tracing::warn!("leadership lost, stopping renew loop");
                                manager.leader.store(false, Ordering::SeqCst);
                                break;
                            }
                            Err(err) => {
                                tracing::warn!(error = %err, "lock renew failed, stopping renew loop");
                                manager.leader.store(false, Ordering::SeqCst);
                                break;
                            }
                        }
                    }
                }
            }
        });
        *self.renew_task.lock().unwrap() = Some(handle);
        Ok(true)
    }

    /// Compresses the engine's snapshot and uploads it. Leader only; the
    /// guard exists because a demoted instance must never clobber the
    /// current leader's upload.
    pub async fn upload(&self) -> Result<String, SyncError> {
        if !self.is_leader() {
            return Err(SyncError::Engine(
                "snapshot upload attempted without leadership".to_string(),
            ));
        }

        let raw = scratch_path(&self.cfg.temp_dir, "dump");
        let packed = scratch_path(&self.cfg.temp_dir, "zst");

        let result = self.upload_inner(&raw, &packed).await;
        let _ = tokio::fs::remove_file(&raw).await;
        let _ = tokio::fs::remove_file(&packed).await;
        result
    }

    async fn upload_inner(&self, raw: &Path, packed: &Path) -> Result<String, SyncError> {
        self.engine.create_snapshot(raw).await?;
        compress_file(raw, packed).await?;
        let etag = self
            .store
            .upload_file(&self.cfg.key, packed, SNAPSHOT_CONTENT_TYPE)
            .await?;

        *self.applied.write().unwrap() = Some(etag.clone());

        #[cfg(feature = "metrics")]
        metrics::counter!("linebot_snapshot_uploads_total").increment(1);

        tracing::info!(key = %self.cfg.key, etag = %etag, "snapshot uploaded");
        Ok(etag)
    }

    /// Spawns the follower poll loop.
    pub fn spawn_poll_loop(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.cfg.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = manager.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if manager.is_leader() {
                            continue;
                        }
                        if let Err(err) = manager.poll_once().await {
                            tracing::warn!(error = %err, "snapshot poll failed, keeping current database");
                        }
                    }
                }
            }
        });
        *self.poll_task.lock().unwrap() = Some(handle);
    }

    /// One poll step: fetch the remote version and swap if it moved.
    pub async fn poll_once(&self) -> Result<bool, SyncError> {
        let remote = match self.store.head(&self.cfg.key).await {
            Ok(etag) => etag,
            Err(SyncError::NotFound) => return Ok(false),
            Err(err) => return Err(err),
        };

        // Reads of the applied version take the read lock only; the
        // download below runs outside any lock.
        if self.applied.read().unwrap().as_deref() == Some(remote.as_str()) {
            return Ok(false);
        }

        let scratch = scratch_path(&self.cfg.temp_dir, "poll");
        let etag = self.store.download_to(&self.cfg.key, &scratch).await?;

        let candidate = self.candidate_path();
        let decompressed = decompress_file(&scratch, &candidate).await;
        let _ = tokio::fs::remove_file(&scratch).await;
        decompressed?;

        if let Err(err) = self.engine.swap(&candidate).await {
            remove_db_files(&candidate).await;
            return Err(err);
        }

        *self.applied.write().unwrap() = Some(etag.clone());

        #[cfg(feature = "metrics")]
        metrics::counter!("linebot_snapshot_swaps_total").increment(1);

        tracing::info!(etag = %etag, "snapshot hot-swapped");
        Ok(true)
    }

    fn candidate_path(&self) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let dir = self
            .cfg
            .db_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        dir.join(format!("cache_{nanos}.db"))
    }

    /// Stops both loops and gives up leadership.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        for slot in [&self.renew_task, &self.poll_task] {
            if let Some(handle) = slot.lock().unwrap().take() {
                handle.abort();
            }
        }
        if self.lock.held() {
            self.leader.store(false, Ordering::SeqCst);
            if let Err(err) = self.lock.release().await {
                tracing::warn!(error = %err, "failed to release leader lock");
            }
        }
    }
}

fn scratch_path(temp_dir: &Path, label: &str) -> PathBuf {
    temp_dir.join(format!("snapshot_{label}_{}.tmp", uuid::Uuid::new_v4()))
}

async fn compress_file(src: &Path, dst: &Path) -> Result<(), SyncError> {
    let src = src.to_path_buf();
    let dst = dst.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<(), SyncError> {
        let input = std::fs::File::open(&src)?;
        let output = std::fs::File::create(&dst)?;
        zstd::stream::copy_encode(
            std::io::BufReader::new(input),
            std::io::BufWriter::new(output),
            COMPRESSION_LEVEL,
        )?;
        Ok(())
    })
    .await
    .map_err(|join| SyncError::Engine(format!("compression task failed: {join}")))?
}

async fn decompress_file(src: &Path, dst: &Path) -> Result<(), SyncError> {
    let src = src.to_path_buf();
    let dst = dst.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<(), SyncError> {
        let input = std::fs::File::open(&src)?;
        let output = std::fs::File::create(&dst)?;
        zstd::stream::copy_decode(
            std::io::BufReader::new(input),
            std::io::BufWriter::new(output),
        )?;
        Ok(())
    })
    .await
    .map_err(|join| SyncError::Engine(format!("decompression task failed: {join}")))?
}

async fn remove_db_files(db: &Path) {
    let _ = tokio::fs::remove_file(db).await;
    if let Some(base) = db.to_str() {
        let _ = tokio::fs::remove_file(format!("{base}-wal")).await;
        let _ = tokio::fs::remove_file(format!("{base}-shm")).await;
    }
}
