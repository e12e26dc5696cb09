use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// Error returned by [`TokenBucket::wait`] when no token can be obtained
/// within the caller's budget.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    /// The deadline passed before a token became available.
    #[error("deadline exceeded while waiting for a rate-limit token")]
    DeadlineExceeded,
    /// The bucket never refills and no deadline was given, so waiting
    /// would block forever.
    #[error("bucket has a zero refill rate and no deadline was given")]
    ZeroRefill,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket with fractional refill.
///
/// The token level is a float so sub-token refills accumulate exactly; a
/// bucket with `refill_per_sec = 0.2` grants one request every five seconds
/// without drift. Refill arithmetic uses [`Instant`], so wall-clock jumps
/// do not mint or burn tokens.
#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_per_sec: f64,
}

impl TokenBucket {
    /// Creates a bucket holding `capacity` tokens, refilled at
    /// `refill_per_sec` tokens per second. The bucket starts full.
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: f64::from(capacity),
                last_refill: Instant::now(),
            }),
            capacity: f64::from(capacity),
            refill_per_sec,
        }
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 && self.refill_per_sec > 0.0 {
            state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        }
        state.last_refill = now;
    }

    /// Attempts to take one token. Never blocks.
    pub fn allow(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        self.refill(&mut state, Instant::now());
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Waits until a token is available or the deadline passes.
    ///
    /// The sleep duration is computed from the deficit and the refill rate,
    /// always outside the lock. A `None` deadline waits indefinitely for a
    /// refilling bucket and fails fast for a bucket that never refills.
    pub async fn wait(&self, deadline: Option<Instant>) -> Result<(), WaitError> {
        loop {
            let needed = {
                let mut state = self.state.lock().unwrap();
                let now = Instant::now();
                self.refill(&mut state, now);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return Ok(());
                }
                1.0 - state.tokens
            };

            let mut delay = if self.refill_per_sec > 0.0 {
                Duration::from_secs_f64(needed / self.refill_per_sec)
                    .max(Duration::from_millis(1))
            } else {
                match deadline {
                    Some(d) => d.saturating_duration_since(Instant::now()),
                    None => return Err(WaitError::ZeroRefill),
                }
            };

            if let Some(d) = deadline {
                let remaining = d.saturating_duration_since(Instant::now());
                if remaining.is_zero() || delay > remaining {
                    return Err(WaitError::DeadlineExceeded);
                }
                delay = delay.min(remaining);
            }

            sleep(delay).await;
        }
    }

    /// Returns the current token level after an observe-only refill.
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock().unwrap();
        self.refill(&mut state, Instant::now());
        state.tokens
    }

    /// Returns true when the bucket is at capacity, i.e. it has been idle
    /// long enough to fully refill.
    pub fn is_full(&self) -> bool {
        self.available() >= self.capacity
    }

    /// The configured capacity.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }
}
