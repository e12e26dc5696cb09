use crate::bucket::TokenBucket;
use crate::events::RateLimitEvent;
use linebot_core::events::{EventListeners, FnListener};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Per-key token buckets with lazy creation and periodic eviction.
///
/// Buckets are created on a conversation's first request and removed by the
/// sweeper once they sit at full capacity, which is exactly the "idle long
/// enough to have fully refilled" condition. An evicted key that returns
/// re-enters at full capacity, so eviction never penalises anyone.
pub struct KeyedLimiter {
    buckets: Arc<RwLock<HashMap<String, Arc<TokenBucket>>>>,
    capacity: u32,
    refill_per_sec: f64,
    name: String,
    listeners: EventListeners<RateLimitEvent>,
    stop_tx: watch::Sender<bool>,
    sweeper: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl KeyedLimiter {
    /// Starts building a keyed limiter.
    pub fn builder() -> KeyedLimiterBuilder {
        KeyedLimiterBuilder::new()
    }

    /// Attempts to take one token from the key's bucket, creating the
    /// bucket on first sight of the key.
    pub fn allow(&self, key: &str) -> bool {
        let existing = {
            let buckets = self.buckets.read().unwrap();
            buckets.get(key).cloned()
        };

        let bucket = match existing {
            Some(b) => b,
            None => {
                let mut buckets = self.buckets.write().unwrap();
                Arc::clone(buckets.entry(key.to_string()).or_insert_with(|| {
                    Arc::new(TokenBucket::new(self.capacity, self.refill_per_sec))
                }))
            }
        };

        let allowed = bucket.allow();
        if !allowed {
            #[cfg(feature = "metrics")]
            metrics::counter!(
                "linebot_ratelimit_dropped_total",
                "tier" => self.name.clone()
            )
            .increment(1);

            #[cfg(feature = "tracing")]
            tracing::debug!(tier = %self.name, key, "rate limit drop");

            self.listeners.emit(&RateLimitEvent::Dropped {
                tier: self.name.clone(),
                timestamp: Instant::now(),
                key: key.to_string(),
            });
        }
        allowed
    }

    /// Remaining tokens for a key; a key with no bucket reports full
    /// capacity (it has never spent anything).
    pub fn remaining(&self, key: &str) -> f64 {
        let buckets = self.buckets.read().unwrap();
        match buckets.get(key) {
            Some(b) => b.available(),
            None => f64::from(self.capacity),
        }
    }

    /// Number of live buckets.
    pub fn active_count(&self) -> usize {
        self.buckets.read().unwrap().len()
    }

    /// The configured per-key capacity.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// The tier name this limiter reports under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops the sweeper. Safe to call more than once.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
        if let Some(handle) = self.sweeper.lock().unwrap().take() {
            handle.abort();
        }
    }

    fn sweep(
        buckets: &RwLock<HashMap<String, Arc<TokenBucket>>>,
        name: &str,
        listeners: &EventListeners<RateLimitEvent>,
    ) {
        let (removed, active) = {
            let mut buckets = buckets.write().unwrap();
            let before = buckets.len();
            buckets.retain(|_, bucket| !bucket.is_full());
            (before - buckets.len(), buckets.len())
        };

        #[cfg(feature = "metrics")]
        {
            metrics::counter!(
                "linebot_ratelimit_swept_total",
                "tier" => name.to_string()
            )
            .increment(removed as u64);
            metrics::gauge!(
                "linebot_ratelimit_active_keys",
                "tier" => name.to_string()
            )
            .set(active as f64);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(tier = name, removed, active, "limiter sweep");

        listeners.emit(&RateLimitEvent::Swept {
            tier: name.to_string(),
            timestamp: Instant::now(),
            removed,
            active,
        });
    }
}

impl Drop for KeyedLimiter {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Builder for [`KeyedLimiter`].
pub struct KeyedLimiterBuilder {
    capacity: u32,
    refill_per_sec: f64,
    sweep_interval: Duration,
    name: String,
    listeners: EventListeners<RateLimitEvent>,
}

impl Default for KeyedLimiterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyedLimiterBuilder {
    /// Creates a new builder with defaults.
    ///
    /// Defaults:
    /// - capacity: 5
    /// - refill: 0.2 tokens/sec
    /// - sweep interval: 5 minutes
    /// - name: `"<unnamed>"`
    pub fn new() -> Self {
        Self {
            capacity: 5,
            refill_per_sec: 0.2,
            sweep_interval: Duration::from_secs(300),
            name: "<unnamed>".to_string(),
            listeners: EventListeners::new(),
        }
    }

    /// Sets the per-key bucket capacity.
    pub fn capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the per-key refill rate in tokens per second.
    pub fn refill_per_sec(mut self, refill_per_sec: f64) -> Self {
        self.refill_per_sec = refill_per_sec;
        self
    }

    /// Sets how often the sweeper evicts idle buckets.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets the tier name used in events and metric labels.
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Registers a callback invoked when a request is dropped.
    pub fn on_drop<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.listeners.add(FnListener::new(move |event| {
            if let RateLimitEvent::Dropped { key, .. } = event {
                f(key);
            }
        }));
        self
    }

    /// Registers a callback invoked after each sweep with the number of
    /// evicted buckets.
    pub fn on_sweep<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.listeners.add(FnListener::new(move |event| {
            if let RateLimitEvent::Swept { removed, .. } = event {
                f(*removed);
            }
        }));
        self
    }

    /// Builds the limiter and spawns its sweeper task.
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> Arc<KeyedLimiter> {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let limiter = Arc::new(KeyedLimiter {
            buckets: Arc::new(RwLock::new(HashMap::new())),
            capacity: self.capacity,
            refill_per_sec: self.refill_per_sec,
            name: self.name,
            listeners: self.listeners,
            stop_tx,
            sweeper: std::sync::Mutex::new(None),
        });

        let buckets = Arc::clone(&limiter.buckets);
        let name = limiter.name.clone();
        let listeners = limiter.listeners.clone();
        let sweep_interval = self.sweep_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        KeyedLimiter::sweep(&buckets, &name, &listeners);
                    }
                }
            }
        });
        *limiter.sweeper.lock().unwrap() = Some(handle);

        limiter
    }
}
