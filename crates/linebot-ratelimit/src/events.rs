use linebot_core::events::RuntimeEvent;
use std::time::Instant;

/// Events emitted by the keyed limiter tiers.
#[derive(Debug, Clone)]
pub enum RateLimitEvent {
    /// A request was rejected because its bucket was empty.
    Dropped {
        tier: String,
        timestamp: Instant,
        key: String,
    },
    /// The sweeper removed idle buckets.
    Swept {
        tier: String,
        timestamp: Instant,
        removed: usize,
        active: usize,
    },
}

impl RuntimeEvent for RateLimitEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RateLimitEvent::Dropped { .. } => "dropped",
            RateLimitEvent::Swept { .. } => "swept",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            RateLimitEvent::Dropped { timestamp, .. }
            | RateLimitEvent::Swept { timestamp, .. } => *timestamp,
        }
    }

    fn component(&self) -> &str {
        match self {
            RateLimitEvent::Dropped { tier, .. } | RateLimitEvent::Swept { tier, .. } => tier,
        }
    }
}
