//! Webhook ingress: verify, ack, then process on a detached worker.
//!
//! The HTTP handler returns 200 as soon as the payload is verified and
//! parsed; the events are copied out and handed to a spawned task that
//! the request lifetime cannot cancel. That task carries its own panic
//! isolation because it lives outside the HTTP stack's recovery
//! middleware.

use crate::handlers::{
    self, HandlerPipeline, PostbackHandler,
};
use crate::line::{
    verify_signature, Event, MessageContent, OutMessage, ReplyClient, Source, WebhookPayload,
};
use crate::text;
use crate::upstream::StickerProvider;
use axum::http::StatusCode;
use futures::FutureExt;
use linebot_core::context::{chat_scope, current_chat_id};
use linebot_llm::{IntentParser, QueryExpander};
use linebot_ratelimit::{KeyedLimiter, LlmQuota, TokenBucket};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::task::TaskTracker;

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Ingress tuning knobs; see the configuration surface for defaults.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub channel_secret: String,
    pub max_messages_per_reply: usize,
    pub max_events_per_webhook: usize,
    pub min_reply_token_length: usize,
    pub max_message_length: usize,
    pub max_postback_data_size: usize,
    /// Per-event budget, measured from when the worker picks the event
    /// up. Not tied to the HTTP request lifetime: the platform's client
    /// may disconnect right after the ack.
    pub processing_timeout: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            channel_secret: String::new(),
            max_messages_per_reply: 5,
            max_events_per_webhook: 100,
            min_reply_token_length: 10,
            max_message_length: 20_000,
            max_postback_data_size: 300,
            processing_timeout: Duration::from_secs(25),
        }
    }
}

/// The optional natural-language features, wired only when an LLM chain
/// survived configuration.
pub struct NluGate {
    pub intent: IntentParser,
    pub expander: QueryExpander,
}

/// The webhook ingress. One instance per process, shared by the HTTP
/// handler and the lifecycle shutdown path.
pub struct WebhookIngress {
    cfg: WebhookConfig,
    reply_client: Arc<dyn ReplyClient>,
    pipeline: Arc<HandlerPipeline>,
    nlu: Option<Arc<NluGate>>,
    postback: Option<Arc<dyn PostbackHandler>>,
    user_limiter: Arc<KeyedLimiter>,
    llm_quota: Arc<LlmQuota>,
    outbound: Arc<TokenBucket>,
    stickers: Arc<dyn StickerProvider>,
    tracker: TaskTracker,
}

/// Builder for [`WebhookIngress`].
pub struct WebhookIngressBuilder {
    cfg: WebhookConfig,
    reply_client: Option<Arc<dyn ReplyClient>>,
    pipeline: Option<Arc<HandlerPipeline>>,
    nlu: Option<Arc<NluGate>>,
    postback: Option<Arc<dyn PostbackHandler>>,
    user_limiter: Option<Arc<KeyedLimiter>>,
    llm_quota: Option<Arc<LlmQuota>>,
    outbound: Option<Arc<TokenBucket>>,
    stickers: Option<Arc<dyn StickerProvider>>,
}

impl WebhookIngressBuilder {
    /// Sets the tuning knobs.
    pub fn config(mut self, cfg: WebhookConfig) -> Self {
        self.cfg = cfg;
        self
    }

    /// Sets the reply client.
    pub fn reply_client(mut self, client: Arc<dyn ReplyClient>) -> Self {
        self.reply_client = Some(client);
        self
    }

    /// Sets the dispatch pipeline.
    pub fn pipeline(mut self, pipeline: Arc<HandlerPipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Wires the natural-language gate; absent means the feature is off.
    pub fn nlu(mut self, nlu: Option<Arc<NluGate>>) -> Self {
        self.nlu = nlu;
        self
    }

    /// Wires the postback handler.
    pub fn postback(mut self, postback: Option<Arc<dyn PostbackHandler>>) -> Self {
        self.postback = postback;
        self
    }

    /// Sets the per-conversation limiter.
    pub fn user_limiter(mut self, limiter: Arc<KeyedLimiter>) -> Self {
        self.user_limiter = Some(limiter);
        self
    }

    /// Sets the shared LLM quota. The same instance is handed to
    /// handlers that need it, so quota spending has a single source of
    /// truth.
    pub fn llm_quota(mut self, quota: Arc<LlmQuota>) -> Self {
        self.llm_quota = Some(quota);
        self
    }

    /// Sets the global outbound bucket.
    pub fn outbound(mut self, outbound: Arc<TokenBucket>) -> Self {
        self.outbound = Some(outbound);
        self
    }

    /// Sets the sticker provider.
    pub fn stickers(mut self, stickers: Arc<dyn StickerProvider>) -> Self {
        self.stickers = Some(stickers);
        self
    }

    /// Builds the ingress. Panics on a missing required component; this
    /// runs once at startup where a panic is a configuration bug.
    pub fn build(self) -> Arc<WebhookIngress> {
        Arc::new(WebhookIngress {
            cfg: self.cfg,
            reply_client: self.reply_client.expect("reply client is required"),
            pipeline: self.pipeline.expect("handler pipeline is required"),
            nlu: self.nlu,
            postback: self.postback,
            user_limiter: self.user_limiter.expect("user limiter is required"),
            llm_quota: self.llm_quota.expect("llm quota is required"),
            outbound: self.outbound.expect("outbound bucket is required"),
            stickers: self.stickers.expect("sticker provider is required"),
            tracker: TaskTracker::new(),
        })
    }
}

impl WebhookIngress {
    /// Starts building an ingress.
    pub fn builder() -> WebhookIngressBuilder {
        WebhookIngressBuilder {
            cfg: WebhookConfig::default(),
            reply_client: None,
            pipeline: None,
            nlu: None,
            postback: None,
            user_limiter: None,
            llm_quota: None,
            outbound: None,
            stickers: None,
        }
    }

    /// The shared LLM quota, for injection into handlers that gate on it.
    pub fn llm_quota(&self) -> Arc<LlmQuota> {
        Arc::clone(&self.llm_quota)
    }

    /// True when the natural-language path is available.
    pub fn nlu_enabled(&self) -> bool {
        self.nlu.as_ref().is_some_and(|n| n.intent.is_enabled())
    }

    /// The synchronous half of the webhook: verify, parse, ack. Events
    /// are copied into the detached worker before this returns, so the
    /// request body can be dropped immediately.
    pub fn callback(self: &Arc<Self>, signature: Option<&str>, body: &[u8]) -> StatusCode {
        if body.len() > MAX_BODY_BYTES {
            return StatusCode::PAYLOAD_TOO_LARGE;
        }

        let Some(signature) = signature else {
            return StatusCode::BAD_REQUEST;
        };
        if !verify_signature(&self.cfg.channel_secret, body, signature) {
            metrics::counter!("linebot_webhook_requests_total", "result" => "bad_signature")
                .increment(1);
            return StatusCode::BAD_REQUEST;
        }

        let payload: WebhookPayload = match serde_json::from_slice(body) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(error = %err, "webhook payload failed to parse");
                metrics::counter!("linebot_webhook_requests_total", "result" => "parse_error")
                    .increment(1);
                return StatusCode::INTERNAL_SERVER_ERROR;
            }
        };

        let mut events = payload.events;
        if events.len() > self.cfg.max_events_per_webhook {
            tracing::warn!(
                total = events.len(),
                kept = self.cfg.max_events_per_webhook,
                "webhook event overflow, truncating"
            );
            events.truncate(self.cfg.max_events_per_webhook);
        }

        metrics::counter!("linebot_webhook_requests_total", "result" => "accepted").increment(1);

        let ingress = Arc::clone(self);
        self.tracker.spawn(async move {
            // This worker runs outside the HTTP stack's recovery layer;
            // a panicking handler must not take the process down.
            let work = std::panic::AssertUnwindSafe(ingress.process_events(events)).catch_unwind();
            if work.await.is_err() {
                tracing::error!("webhook worker panicked");
                metrics::counter!("linebot_webhook_panics_total").increment(1);
            }
        });

        StatusCode::OK
    }

    /// Waits for in-flight fan-out work, up to `grace`.
    pub async fn shutdown(&self, grace: Duration) {
        self.tracker.close();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            tracing::warn!("webhook fan-out did not drain within the grace period");
        }
    }

    async fn process_events(self: Arc<Self>, events: Vec<Event>) {
        for event in events {
            let deadline = Instant::now() + self.cfg.processing_timeout;
            let processed =
                tokio::time::timeout(self.cfg.processing_timeout, self.process_event(event, deadline))
                    .await;
            if processed.is_err() {
                tracing::warn!("event processing timed out");
                metrics::counter!("linebot_webhook_events_total", "result" => "timeout")
                    .increment(1);
            }
        }
    }

    async fn process_event(&self, event: Event, deadline: Instant) {
        let Some(source) = event.source().cloned() else {
            return;
        };
        let reply_token = event.reply_token().unwrap_or_default().to_string();
        let chat_id = source.chat_id().unwrap_or("anonymous").to_string();

        let this = &*self;
        chat_scope(chat_id, async move {
            let replies = match event {
                Event::Message { message, .. } => {
                    this.handle_message(&source, message, deadline).await
                }
                Event::Postback { postback, .. } => this.handle_postback(&postback.data).await,
                Event::Follow { .. } => {
                    metrics::counter!("linebot_webhook_events_total", "result" => "follow")
                        .increment(1);
                    Some(handlers::greeting_messages())
                }
                Event::Unknown => None,
            };

            if let Some(replies) = replies {
                this.send_reply(&reply_token, replies, deadline).await;
            }
        })
        .await;
    }

    async fn handle_message(
        &self,
        source: &Source,
        message: MessageContent,
        deadline: Instant,
    ) -> Option<Vec<OutMessage>> {
        let chat_id = current_chat_id().unwrap_or_else(|| "anonymous".to_string());

        // Best-effort typing hint, 1-on-1 only.
        if source.is_personal() {
            if let Err(err) = self.reply_client.show_loading(&chat_id).await {
                tracing::debug!(error = %err, "loading indicator failed");
            }
        }

        match message {
            MessageContent::Text { text, mention, .. } => {
                let text = match self.filter_group_mention(source, text, mention) {
                    Some(text) => text,
                    None => return None,
                };
                let text = text::sanitize(&text);

                if text.chars().count() > self.cfg.max_message_length {
                    return Some(vec![handlers::message_too_long(
                        self.cfg.max_message_length,
                    )]);
                }

                if !self.user_limiter.allow(&chat_id) {
                    // Friendly nudge in 1-on-1; silence in shared chats
                    // to avoid spamming everyone.
                    return source
                        .is_personal()
                        .then(|| vec![handlers::rate_limited_message()]);
                }

                if text.is_empty() {
                    return None;
                }

                match self.pipeline.dispatch(&text).await {
                    Ok(Some(replies)) => Some(replies),
                    Ok(None) => self.handle_unmatched(source, &text, deadline).await,
                    Err(err) => {
                        tracing::warn!(error = %err, "handler failed");
                        Some(handlers::help_messages(self.nlu_enabled()))
                    }
                }
            }
            MessageContent::Sticker { .. } => {
                if !self.user_limiter.allow(&chat_id) {
                    return source
                        .is_personal()
                        .then(|| vec![handlers::rate_limited_message()]);
                }
                self.stickers
                    .pick()
                    .map(|(package, sticker)| vec![OutMessage::sticker(package, sticker)])
            }
            MessageContent::Other => None,
        }
    }

    /// In group/room chats only messages that mention the bot are
    /// processed, and the mention span itself is removed before
    /// dispatch. Returns `None` when the message is not for us.
    fn filter_group_mention(
        &self,
        source: &Source,
        text: String,
        mention: Option<crate::line::Mention>,
    ) -> Option<String> {
        if source.is_personal() {
            return Some(text);
        }
        let mention = mention?;
        let own = mention.mentionees.iter().find(|m| m.is_self)?;
        Some(text::excise_span(&text, own.index, own.length))
    }

    async fn handle_unmatched(
        &self,
        source: &Source,
        text: &str,
        deadline: Instant,
    ) -> Option<Vec<OutMessage>> {
        let nlu = match &self.nlu {
            Some(nlu) if nlu.intent.is_enabled() => nlu,
            _ => return Some(handlers::help_messages(false)),
        };

        // The quota key rides the task-local set by the event scope.
        let chat_id = current_chat_id().unwrap_or_else(|| "anonymous".to_string());
        if !self.llm_quota.allow(&chat_id) {
            let minutes = self.llm_quota.estimate_reset_minutes(&chat_id);
            return source.is_personal().then(|| {
                vec![handlers::quota_exhausted_message(
                    self.llm_quota.per_hour(),
                    minutes,
                )]
            });
        }

        match nlu.intent.parse(text, Some(deadline)).await {
            Ok(intent) => {
                let query = if intent.query.is_empty() {
                    text
                } else {
                    intent.query.as_str()
                };
                match self.pipeline.by_name(&intent.action) {
                    Some(handler) => match handler.handle(query).await {
                        Ok(replies) if !replies.is_empty() => Some(replies),
                        Ok(_) => Some(handlers::help_messages(true)),
                        Err(err) => {
                            tracing::warn!(error = %err, action = %intent.action, "intent handler failed");
                            Some(handlers::help_messages(true))
                        }
                    },
                    None => Some(handlers::help_messages(true)),
                }
            }
            Err(err) => {
                // Total NLU failure falls back to the deterministic path.
                tracing::warn!(error = %err, "intent parsing failed");
                metrics::counter!("linebot_nlu_failures_total").increment(1);
                Some(handlers::help_messages(true))
            }
        }
    }

    async fn handle_postback(&self, data: &str) -> Option<Vec<OutMessage>> {
        if data.len() > self.cfg.max_postback_data_size {
            return Some(vec![handlers::postback_expired_message()]);
        }
        let handler = self.postback.as_ref()?;
        match handler.handle(data).await {
            Ok(replies) => Some(replies),
            Err(err) => {
                tracing::warn!(error = %err, "postback handler failed");
                Some(vec![handlers::postback_expired_message()])
            }
        }
    }

    async fn send_reply(&self, token: &str, mut messages: Vec<OutMessage>, deadline: Instant) {
        if messages.is_empty() {
            return;
        }
        if token.is_empty() || token.chars().count() < self.cfg.min_reply_token_length {
            tracing::debug!("skipping reply: token absent or too short");
            return;
        }

        if messages.len() > self.cfg.max_messages_per_reply {
            messages.truncate(self.cfg.max_messages_per_reply - 1);
            messages.push(handlers::truncation_notice());
        }

        // Global outbound gate. The reply token stays valid long enough
        // to wait out a short deficit.
        if !self.outbound.allow() {
            metrics::counter!("linebot_ratelimit_dropped_total", "tier" => "global").increment(1);
            if let Err(err) = self.outbound.wait(Some(deadline)).await {
                tracing::warn!(error = %err, "gave up waiting for outbound budget");
                return;
            }
        }

        let token_prefix: String = token.chars().take(8).collect();
        match self.reply_client.reply(token, &messages).await {
            Ok(()) => {
                metrics::counter!("linebot_replies_total", "result" => "ok").increment(1);
            }
            Err(err) if err.is_invalid_reply_token() => {
                metrics::counter!("linebot_replies_total", "result" => "invalid_token")
                    .increment(1);
                tracing::warn!(token = %token_prefix, "reply token rejected");
            }
            Err(err) if err.is_rate_limited() => {
                metrics::counter!("linebot_replies_total", "result" => "rate_limited")
                    .increment(1);
                tracing::warn!(token = %token_prefix, "platform rate limit on reply");
            }
            Err(err) => {
                metrics::counter!("linebot_replies_total", "result" => "error").increment(1);
                tracing::warn!(token = %token_prefix, error = %err, "reply failed");
            }
        }
    }
}
