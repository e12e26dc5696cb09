//! Background maintenance loops.
//!
//! Four loops share one cancellation root: cache cleanup, upstream
//! refresh, the daily pre-warm, and the metrics sampler. A failed tick
//! logs and waits for the next one; only shutdown stops a loop. When a
//! schedule store is configured the shared jobs (refresh, cleanup) are
//! claimed through it so a fleet runs each of them once per interval,
//! and the leader publishes a fresh snapshot after refreshing.

use crate::storage::CacheStore;
use crate::upstream::{StickerProvider, Upstream};
use chrono::{Local, TimeZone};
use linebot_sync::{ScheduleStore, SnapshotManager};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

const REFRESH_SUB_TIMEOUT: Duration = Duration::from_secs(300);
const SAMPLE_INTERVAL: Duration = Duration::from_secs(300);
const WARMUP_HOUR: u32 = 3;
/// Slack subtracted from a shared job's interval when deciding whether
/// another instance already ran it; absorbs clock and tick skew.
const SHARED_JOB_SLACK: Duration = Duration::from_secs(60);

/// Tuning for the maintenance loops.
#[derive(Debug, Clone)]
pub struct JobsConfig {
    pub cache_ttl: Duration,
    pub cleanup_interval: Duration,
    pub cleanup_initial_delay: Duration,
    pub refresh_interval: Duration,
    pub refresh_initial_delay: Duration,
    pub warmup_modules: Vec<String>,
}

enum SharedJob {
    Refresh,
    Cleanup,
}

/// Owns the four maintenance loops.
pub struct JobRunner {
    engine: Arc<dyn CacheStore>,
    upstreams: Vec<Arc<dyn Upstream>>,
    stickers: Arc<dyn StickerProvider>,
    schedule: Option<Arc<ScheduleStore>>,
    snapshots: Option<Arc<SnapshotManager>>,
    cfg: JobsConfig,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl JobRunner {
    /// Creates a runner. `schedule` and `snapshots` are present only in
    /// fleet mode.
    pub fn new(
        engine: Arc<dyn CacheStore>,
        upstreams: Vec<Arc<dyn Upstream>>,
        stickers: Arc<dyn StickerProvider>,
        schedule: Option<Arc<ScheduleStore>>,
        snapshots: Option<Arc<SnapshotManager>>,
        cfg: JobsConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine,
            upstreams,
            stickers,
            schedule,
            snapshots,
            cfg,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    /// Spawns all four loops.
    pub fn spawn_all(self: &Arc<Self>) {
        let runner = Arc::clone(self);
        self.tracker.spawn(async move { runner.cleanup_loop().await });
        let runner = Arc::clone(self);
        self.tracker.spawn(async move { runner.refresh_loop().await });
        let runner = Arc::clone(self);
        self.tracker.spawn(async move { runner.prewarm_loop().await });
        let runner = Arc::clone(self);
        self.tracker.spawn(async move { runner.sampler_loop().await });
    }

    /// Cancels every loop without waiting; the shutdown sequence calls
    /// this first so no new background work starts while the HTTP
    /// server drains.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancels every loop and waits for them to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Waits `delay` unless shutdown arrives first; true means proceed.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn cleanup_loop(&self) {
        if !self.pause(self.cfg.cleanup_initial_delay).await {
            return;
        }
        loop {
            if self.claim_shared(SharedJob::Cleanup).await {
                self.run_cleanup().await;
            }
            if !self.pause(self.cfg.cleanup_interval).await {
                return;
            }
        }
    }

    async fn refresh_loop(&self) {
        if !self.pause(self.cfg.refresh_initial_delay).await {
            return;
        }
        loop {
            if self.claim_shared(SharedJob::Refresh).await {
                self.run_refresh().await;
            }
            if !self.pause(self.cfg.refresh_interval).await {
                return;
            }
        }
    }

    async fn prewarm_loop(&self) {
        loop {
            let wait = until_daily_anchor(WARMUP_HOUR);
            tracing::debug!(?wait, "next pre-warm scheduled");
            if !self.pause(wait).await {
                return;
            }
            self.run_warmup().await;
        }
    }

    async fn sampler_loop(&self) {
        loop {
            if !self.pause(SAMPLE_INTERVAL).await {
                return;
            }
            for namespace in self.engine.namespaces() {
                match self.engine.count(&namespace).await {
                    Ok(count) => {
                        metrics::gauge!("linebot_cache_records", "namespace" => namespace.clone())
                            .set(count as f64);
                    }
                    Err(err) => {
                        tracing::warn!(namespace, error = %err, "cache count failed");
                    }
                }
            }
        }
    }

    /// Decides whether this instance should run a shared job now. In
    /// single-node mode the answer is always yes; in fleet mode the
    /// schedule object arbitrates: whoever CASes a fresh timestamp in
    /// first wins the round.
    async fn claim_shared(&self, job: SharedJob) -> bool {
        let Some(schedule) = &self.schedule else {
            return true;
        };

        let interval = match job {
            SharedJob::Refresh => self.cfg.refresh_interval,
            SharedJob::Cleanup => self.cfg.cleanup_interval,
        };
        let threshold = interval.saturating_sub(SHARED_JOB_SLACK).as_secs() as i64;
        let now = chrono::Utc::now().timestamp();

        let won = std::sync::atomic::AtomicBool::new(false);
        let result = schedule
            .update(|state| {
                let last = match job {
                    SharedJob::Refresh => &mut state.last_refresh,
                    SharedJob::Cleanup => &mut state.last_cleanup,
                };
                if now - *last >= threshold {
                    *last = now;
                    won.store(true, std::sync::atomic::Ordering::Relaxed);
                } else {
                    won.store(false, std::sync::atomic::Ordering::Relaxed);
                }
            })
            .await;

        match result {
            Ok(_) => won.load(std::sync::atomic::Ordering::Relaxed),
            Err(err) => {
                // When coordination is unavailable, running the job
                // twice beats not running it at all.
                tracing::warn!(error = %err, "schedule claim failed, running job locally");
                true
            }
        }
    }

    async fn run_cleanup(&self) {
        let started = Instant::now();
        let mut removed_total = 0u64;
        for namespace in self.engine.namespaces() {
            match self.engine.delete_expired(&namespace, self.cfg.cache_ttl).await {
                Ok(removed) => removed_total += removed,
                Err(err) => tracing::warn!(namespace, error = %err, "expiry sweep failed"),
            }
        }
        if let Err(err) = self.engine.compact().await {
            tracing::warn!(error = %err, "compaction failed");
        }

        metrics::counter!("linebot_cache_cleanups_total").increment(1);
        metrics::histogram!("linebot_job_duration_seconds", "job" => "cleanup")
            .record(started.elapsed().as_secs_f64());
        tracing::info!(
            removed = removed_total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "cache cleanup finished"
        );
    }

    async fn run_refresh(&self) {
        let started = Instant::now();
        for upstream in &self.upstreams {
            match tokio::time::timeout(REFRESH_SUB_TIMEOUT, upstream.refresh()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(upstream = upstream.name(), error = %err, "refresh failed")
                }
                Err(_) => {
                    tracing::warn!(upstream = upstream.name(), "refresh timed out")
                }
            }
        }
        match self.stickers.refresh().await {
            Ok(size) => tracing::debug!(size, "sticker set refreshed"),
            Err(err) => tracing::warn!(error = %err, "sticker refresh failed"),
        }

        metrics::histogram!("linebot_job_duration_seconds", "job" => "refresh")
            .record(started.elapsed().as_secs_f64());
        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "source refresh finished"
        );

        // The instance that refreshed publishes the result for the rest
        // of the fleet.
        if let Some(snapshots) = &self.snapshots {
            match snapshots.try_become_leader().await {
                Ok(true) => {
                    if let Err(err) = snapshots.upload().await {
                        tracing::warn!(error = %err, "snapshot upload failed");
                    }
                }
                Ok(false) => {
                    tracing::debug!("not leader, skipping snapshot upload");
                }
                Err(err) => {
                    tracing::warn!(error = %err, "leader election attempt failed");
                }
            }
        }
    }

    async fn run_warmup(&self) {
        for module in &self.cfg.warmup_modules {
            for upstream in &self.upstreams {
                if let Err(err) = upstream.warm(module).await {
                    tracing::warn!(module, upstream = upstream.name(), error = %err, "warmup failed");
                }
            }
        }
        tracing::info!(modules = ?self.cfg.warmup_modules, "pre-warm finished");
    }
}

/// Time until the next local wall-clock anchor at `hour:00`. Wall clock
/// on purpose: "03:00" means whatever the machine's timezone says.
fn until_daily_anchor(hour: u32) -> Duration {
    let now = Local::now();
    let today = now
        .date_naive()
        .and_hms_opt(hour, 0, 0)
        .expect("fixed anchor time is valid");
    let mut target = match Local.from_local_datetime(&today).earliest() {
        Some(t) => t,
        None => return Duration::from_secs(24 * 3600),
    };
    if target <= now {
        target = target + chrono::Duration::days(1);
    }
    (target - now).to_std().unwrap_or(Duration::from_secs(24 * 3600))
}
