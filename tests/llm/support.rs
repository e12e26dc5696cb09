//! Scripted providers shared by the chain tests.

use async_trait::async_trait;
use linebot_llm::{ChatProvider, ChatRequest, LlmError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// A provider that fails a fixed number of times, then succeeds with
/// `"{tag}:{model}"`.
pub struct ScriptedProvider {
    tag: &'static str,
    model: &'static str,
    failures_before_success: u32,
    pub calls: AtomicU32,
    error_status: u16,
    error_message: &'static str,
}

impl ScriptedProvider {
    pub fn succeeding(tag: &'static str, model: &'static str) -> Arc<Self> {
        Arc::new(Self {
            tag,
            model,
            failures_before_success: 0,
            calls: AtomicU32::new(0),
            error_status: 0,
            error_message: "",
        })
    }

    pub fn failing_n_times(
        tag: &'static str,
        model: &'static str,
        n: u32,
        status: u16,
        message: &'static str,
    ) -> Arc<Self> {
        Arc::new(Self {
            tag,
            model,
            failures_before_success: n,
            calls: AtomicU32::new(0),
            error_status: status,
            error_message: message,
        })
    }

    pub fn always_failing(
        tag: &'static str,
        model: &'static str,
        status: u16,
        message: &'static str,
    ) -> Arc<Self> {
        Self::failing_n_times(tag, model, u32::MAX, status, message)
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn provider_tag(&self) -> &str {
        self.tag
    }

    fn model(&self) -> &str {
        self.model
    }

    async fn complete(&self, _request: &ChatRequest) -> Result<String, LlmError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures_before_success {
            Err(LlmError::Provider {
                provider: self.tag.to_string(),
                status: self.error_status,
                message: self.error_message.to_string(),
                retry_after: None,
            })
        } else {
            Ok(format!("{}:{}", self.tag, self.model))
        }
    }
}
