use crate::registry::{KeyedLimiter, KeyedLimiterBuilder};
use std::sync::Arc;
use std::time::Duration;

/// Per-conversation LLM quota, sized in requests per hour.
///
/// Wraps a [`KeyedLimiter`] whose buckets refill at `per_hour / 3600`
/// tokens per second, and adds the reset estimate shown to users when
/// their quota runs out.
pub struct LlmQuota {
    inner: Arc<KeyedLimiter>,
    per_hour: u32,
}

impl LlmQuota {
    /// Creates a quota of `per_hour` requests per key per hour.
    ///
    /// Must be called inside a tokio runtime (the inner limiter spawns its
    /// sweeper).
    pub fn new(per_hour: u32, sweep_interval: Duration) -> Self {
        Self::from_builder(per_hour, KeyedLimiter::builder().sweep_interval(sweep_interval))
    }

    /// Creates a quota from a pre-configured builder; capacity and refill
    /// are overridden to the hourly shape.
    pub fn from_builder(per_hour: u32, builder: KeyedLimiterBuilder) -> Self {
        let inner = builder
            .name("llm")
            .capacity(per_hour)
            .refill_per_sec(f64::from(per_hour) / 3600.0)
            .build();
        Self { inner, per_hour }
    }

    /// Attempts to spend one request from the key's hourly quota.
    pub fn allow(&self, key: &str) -> bool {
        self.inner.allow(key)
    }

    /// Remaining requests in the current hour for the key.
    pub fn remaining(&self, key: &str) -> f64 {
        self.inner.remaining(key)
    }

    /// The configured hourly capacity.
    pub fn per_hour(&self) -> u32 {
        self.per_hour
    }

    /// Estimated minutes until the key's quota is fully restored, clamped
    /// to at least one minute. Approximate, but good enough for a
    /// user-facing "try again in N minutes" message.
    pub fn estimate_reset_minutes(&self, key: &str) -> u64 {
        let cap = f64::from(self.per_hour);
        if cap <= 0.0 {
            return 1;
        }
        let remaining = self.remaining(key).clamp(0.0, cap);
        let seconds = (cap - remaining) * 3600.0 / cap;
        let minutes = (seconds / 60.0).ceil() as u64;
        minutes.max(1)
    }

    /// Stops the inner sweeper.
    pub fn stop(&self) {
        self.inner.stop();
    }
}
