//! LLM access for the linebot runtime.
//!
//! A [`FallbackChain`] holds an ordered list of provider handles. Each user
//! call walks the chain: the current handle is retried with full-jitter
//! exponential backoff while its errors classify as transient, then the
//! chain moves on to the next handle unless the error is permanent. Two
//! façades put the chain to work:
//!
//! - [`IntentParser`] — propagates total failure to the caller, which falls
//!   back to the deterministic keyword path.
//! - [`QueryExpander`] — never fails; on total failure the original query
//!   comes back unchanged.
//!
//! # Examples
//!
//! ```no_run
//! use linebot_llm::{ChainBuilder, ChatRequest, RetryPolicy};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), linebot_llm::LlmError> {
//! let chain = ChainBuilder::new("intent")
//!     .retry(RetryPolicy {
//!         max_attempts: 3,
//!         initial_delay: Duration::from_millis(500),
//!         max_delay: Duration::from_secs(8),
//!     })
//!     .gemini("api-key", "gemini-2.0-flash")
//!     .groq("api-key", "llama-3.3-70b-versatile")
//!     .build();
//!
//! let reply = chain
//!     .generate(&ChatRequest::prompt("hello"), None)
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod backoff;
mod chain;
mod classify;
mod error;
mod events;
mod providers;

pub use backoff::{full_jitter, has_sufficient_budget, RetryPolicy};
pub use chain::{ChainBuilder, FallbackChain, Intent, IntentParser, QueryExpander};
pub use classify::{classify, parse_retry_after, ErrorAction};
pub use error::LlmError;
pub use events::ChainEvent;
pub use providers::{ChatProvider, ChatRequest, GeminiClient, GroqClient};
