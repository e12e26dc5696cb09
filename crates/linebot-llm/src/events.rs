use linebot_core::events::RuntimeEvent;
use std::time::{Duration, Instant};

/// Events emitted by a fallback chain.
#[derive(Debug, Clone)]
pub enum ChainEvent {
    /// A handle's call failed with a transient error and will be retried.
    Retry {
        chain: String,
        timestamp: Instant,
        provider: String,
        model: String,
        attempt: u32,
        delay: Duration,
    },
    /// A handle gave up (retries exhausted or a non-retryable error).
    HandleFailed {
        chain: String,
        timestamp: Instant,
        provider: String,
        model: String,
        attempts: u32,
    },
    /// A handle produced a result.
    Success {
        chain: String,
        timestamp: Instant,
        provider: String,
        model: String,
        attempts: u32,
    },
    /// The chain moved across a provider boundary before succeeding.
    /// Model switches within one provider do not emit this.
    ProviderFallback {
        chain: String,
        timestamp: Instant,
        from: String,
        to: String,
    },
    /// The expander swallowed a total failure and returned the input.
    Degraded {
        chain: String,
        timestamp: Instant,
    },
}

impl RuntimeEvent for ChainEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ChainEvent::Retry { .. } => "retry",
            ChainEvent::HandleFailed { .. } => "handle_failed",
            ChainEvent::Success { .. } => "success",
            ChainEvent::ProviderFallback { .. } => "provider_fallback",
            ChainEvent::Degraded { .. } => "degraded",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            ChainEvent::Retry { timestamp, .. }
            | ChainEvent::HandleFailed { timestamp, .. }
            | ChainEvent::Success { timestamp, .. }
            | ChainEvent::ProviderFallback { timestamp, .. }
            | ChainEvent::Degraded { timestamp, .. } => *timestamp,
        }
    }

    fn component(&self) -> &str {
        match self {
            ChainEvent::Retry { chain, .. }
            | ChainEvent::HandleFailed { chain, .. }
            | ChainEvent::Success { chain, .. }
            | ChainEvent::ProviderFallback { chain, .. }
            | ChainEvent::Degraded { chain, .. } => chain,
        }
    }
}
