//! Provider clients.
//!
//! Each client speaks the minimal chat-completion surface of one vendor.
//! The chain only sees the [`ChatProvider`] trait; everything
//! vendor-specific stays behind it.

mod gemini;
mod groq;

pub use gemini::GeminiClient;
pub use groq::GroqClient;

use crate::error::LlmError;
use async_trait::async_trait;

/// A single chat-completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Optional system instruction.
    pub system: Option<String>,
    /// The user prompt.
    pub prompt: String,
    /// Sampling temperature; provider default when `None`.
    pub temperature: Option<f32>,
    /// Output token cap; provider default when `None`.
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    /// A request carrying only a user prompt.
    pub fn prompt<S: Into<String>>(prompt: S) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// Adds a system instruction.
    pub fn with_system<S: Into<String>>(mut self, system: S) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// One (provider, model) handle the chain can call.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Stable provider tag, e.g. `"gemini"`. Fallback accounting compares
    /// tags, not models: switching models within one provider is not a
    /// cross-provider fallback.
    fn provider_tag(&self) -> &str;

    /// The model this handle targets.
    fn model(&self) -> &str;

    /// Performs one completion and returns the generated text.
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError>;
}
