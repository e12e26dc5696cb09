//! Token-bucket rate limiting for the linebot runtime.
//!
//! Three tiers share one bucket implementation:
//!
//! - **Global outbound** — a single [`TokenBucket`] gating every reply sent
//!   to the platform, so a burst of webhooks cannot exceed the platform's
//!   push budget.
//! - **Per-conversation** — a [`KeyedLimiter`] mapping each chat to its own
//!   bucket, lazily created and swept once idle.
//! - **LLM quota** — an [`LlmQuota`] registry sized in requests per hour,
//!   with a reset estimate suitable for user-facing messages.
//!
//! # Examples
//!
//! ```
//! use linebot_ratelimit::TokenBucket;
//!
//! let bucket = TokenBucket::new(2, 0.0);
//! assert!(bucket.allow());
//! assert!(bucket.allow());
//! assert!(!bucket.allow());
//! ```
//!
//! Per-conversation limiting with a background sweeper:
//!
//! ```no_run
//! use linebot_ratelimit::KeyedLimiter;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let limiter = KeyedLimiter::builder()
//!     .name("user")
//!     .capacity(5)
//!     .refill_per_sec(0.2)
//!     .sweep_interval(Duration::from_secs(300))
//!     .build();
//!
//! if !limiter.allow("U1234") {
//!     // tell the user to slow down
//! }
//! # limiter.stop();
//! # }
//! ```

mod bucket;
mod events;
mod quota;
mod registry;

pub use bucket::{TokenBucket, WaitError};
pub use events::RateLimitEvent;
pub use quota::LlmQuota;
pub use registry::{KeyedLimiter, KeyedLimiterBuilder};
