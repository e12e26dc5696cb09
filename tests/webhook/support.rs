//! Fakes and builders shared by the webhook scenarios.

use async_trait::async_trait;
use linebot_llm::{ChainBuilder, ChatProvider, ChatRequest, IntentParser, LlmError, QueryExpander, RetryPolicy};
use linebot_ratelimit::{KeyedLimiter, LlmQuota, TokenBucket};
use linebot_server::handlers::{HandlerError, HandlerPipeline, HelpHandler, MessageHandler};
use linebot_server::line::{sign_body, LineApiError, OutMessage, ReplyClient};
use linebot_server::upstream::StaticStickerProvider;
use linebot_server::webhook::{NluGate, WebhookConfig, WebhookIngress};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SECRET: &str = "test-channel-secret";

/// Captures every outbound reply.
pub struct RecordingClient {
    sent: Mutex<Vec<(String, Vec<OutMessage>)>>,
}

impl RecordingClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<(String, Vec<OutMessage>)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReplyClient for RecordingClient {
    async fn reply(&self, reply_token: &str, messages: &[OutMessage]) -> Result<(), LineApiError> {
        self.sent
            .lock()
            .unwrap()
            .push((reply_token.to_string(), messages.to_vec()));
        Ok(())
    }

    async fn show_loading(&self, _chat_id: &str) -> Result<(), LineApiError> {
        Ok(())
    }
}

/// Matches course queries the way the keyword path would.
pub struct CourseHandler;

#[async_trait]
impl MessageHandler for CourseHandler {
    fn name(&self) -> &'static str {
        "course"
    }

    fn can_handle(&self, text: &str) -> bool {
        text.contains("微積分") || text.starts_with("課程")
    }

    async fn handle(&self, text: &str) -> Result<Vec<OutMessage>, HandlerError> {
        Ok(vec![OutMessage::text(format!("課程查詢結果：{text}"))])
    }
}

/// A counting LLM provider that always succeeds.
pub struct CountingProvider {
    pub calls: AtomicU32,
}

impl CountingProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl ChatProvider for CountingProvider {
    fn provider_tag(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        "test-model"
    }

    async fn complete(&self, _request: &ChatRequest) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(r#"{"action": "course", "query": "微積分"}"#.to_string())
    }
}

/// Builds an NLU gate over one scripted provider.
pub fn nlu_over(provider: Arc<dyn ChatProvider>) -> Arc<NluGate> {
    let retry = RetryPolicy {
        max_attempts: 2,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
    };
    let intent = ChainBuilder::new("intent")
        .retry(retry)
        .handle(Arc::clone(&provider))
        .build();
    let expander = ChainBuilder::new("expand")
        .retry(retry)
        .handle(provider)
        .build();
    Arc::new(NluGate {
        intent: IntentParser::new(intent),
        expander: QueryExpander::new(expander),
    })
}

pub struct IngressOptions {
    pub user_capacity: u32,
    pub llm_per_hour: u32,
    pub nlu: Option<Arc<NluGate>>,
}

impl Default for IngressOptions {
    fn default() -> Self {
        Self {
            user_capacity: 5,
            llm_per_hour: 10,
            nlu: None,
        }
    }
}

/// Assembles an ingress over the fakes, mirroring the production wiring.
pub fn build_ingress(client: Arc<RecordingClient>, options: IngressOptions) -> Arc<WebhookIngress> {
    let nlu_enabled = options.nlu.is_some();
    let pipeline = Arc::new(HandlerPipeline::new(vec![
        Arc::new(CourseHandler),
        Arc::new(HelpHandler::new(nlu_enabled)),
    ]));

    WebhookIngress::builder()
        .config(WebhookConfig {
            channel_secret: SECRET.to_string(),
            processing_timeout: Duration::from_secs(5),
            ..WebhookConfig::default()
        })
        .reply_client(client)
        .pipeline(pipeline)
        .nlu(options.nlu)
        .user_limiter(
            KeyedLimiter::builder()
                .name("user")
                .capacity(options.user_capacity)
                .refill_per_sec(0.0)
                .build(),
        )
        .llm_quota(Arc::new(LlmQuota::new(
            options.llm_per_hour,
            Duration::from_secs(3600),
        )))
        .outbound(Arc::new(TokenBucket::new(100, 100.0)))
        .stickers(Arc::new(StaticStickerProvider::default_set()))
        .build()
}

/// Signs and posts a payload to the ingress.
pub fn post(ingress: &Arc<WebhookIngress>, body: &[u8]) -> axum::http::StatusCode {
    let signature = sign_body(SECRET, body);
    ingress.callback(Some(&signature), body)
}

/// A message event payload from a 1-on-1 chat.
pub fn personal_text(user: &str, text: &str, token: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "destination": "bot",
        "events": [{
            "type": "message",
            "replyToken": token,
            "source": {"type": "user", "userId": user},
            "message": {"type": "text", "id": "m", "text": text}
        }]
    }))
    .unwrap()
}
