use rand::rngs::OsRng;
use rand::Rng;
use std::time::{Duration, Instant};

/// Retry shape shared by every handle in a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per handle, including the first. Zero behaves as one.
    pub max_attempts: u32,
    /// Backoff cap doubles from here.
    pub initial_delay: Duration,
    /// Upper bound on any single backoff.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

/// Full-jitter exponential backoff.
///
/// `attempt` counts from 1 for the first retry; attempt 0 returns zero.
/// The delay is uniform over `[0, min(max, initial * 2^(attempt-1)))`,
/// drawn from the OS random source so concurrent clients do not sync up
/// on a shared PRNG stream.
pub fn full_jitter(attempt: u32, initial: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let exp = attempt.saturating_sub(1).min(32);
    let cap = initial
        .saturating_mul(1u32.checked_shl(exp).unwrap_or(u32::MAX))
        .min(max);
    if cap.is_zero() {
        return Duration::ZERO;
    }
    let nanos = OsRng.gen_range(0..cap.as_nanos().max(1)) as u64;
    Duration::from_nanos(nanos)
}

/// Returns true when sleeping `delay` would still leave the deadline
/// reachable. A `None` deadline always has budget.
pub fn has_sufficient_budget(deadline: Option<Instant>, delay: Duration) -> bool {
    match deadline {
        None => true,
        Some(d) => d.saturating_duration_since(Instant::now()) >= delay,
    }
}
