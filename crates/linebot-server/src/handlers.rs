//! The reply-producing side of the bot.
//!
//! Keyword handlers (contact, course, student id) live outside this
//! service and plug in through [`MessageHandler`]; this module owns the
//! dispatch pipeline, the built-in help handler, and the canned texts the
//! ingress sends for rate limiting and quota exhaustion.

use crate::line::{OutMessage, QuickReply, QuickReplyItem};
use async_trait::async_trait;
use std::sync::Arc;

/// Error from a reply handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("handler failed: {0}")]
    Failed(String),
}

/// A deterministic text handler.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Stable name; intent actions route to handlers by this name.
    fn name(&self) -> &'static str;

    /// Cheap match test, run in dispatch order.
    fn can_handle(&self, text: &str) -> bool;

    /// Produces the ordered reply messages for a matched text.
    async fn handle(&self, text: &str) -> Result<Vec<OutMessage>, HandlerError>;
}

/// Handler for postback actions (button taps carrying a data payload).
#[async_trait]
pub trait PostbackHandler: Send + Sync {
    async fn handle(&self, data: &str) -> Result<Vec<OutMessage>, HandlerError>;
}

/// The ordered dispatch pipeline.
///
/// Order is load-bearing and fixed at construction: contact before
/// course before student-id before help. The student-id matcher claims
/// any text containing "系", so putting it earlier would swallow
/// department contact queries like "聯繫 資工系".
pub struct HandlerPipeline {
    handlers: Vec<Arc<dyn MessageHandler>>,
}

impl HandlerPipeline {
    /// Creates a pipeline; `handlers` must already be in dispatch order.
    pub fn new(handlers: Vec<Arc<dyn MessageHandler>>) -> Self {
        Self { handlers }
    }

    /// Runs the first matching handler. `Ok(None)` means nothing
    /// matched and the caller should consult the intent parser or send
    /// help.
    pub async fn dispatch(&self, text: &str) -> Result<Option<Vec<OutMessage>>, HandlerError> {
        for handler in &self.handlers {
            if handler.can_handle(text) {
                let replies = handler.handle(text).await?;
                return Ok(Some(replies));
            }
        }
        Ok(None)
    }

    /// Routes an intent action to the handler carrying that name.
    pub fn by_name(&self, name: &str) -> Option<&Arc<dyn MessageHandler>> {
        self.handlers.iter().find(|h| h.name() == name)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True when no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// The quick-reply block offering the bot's entry points; appended to
/// help, quota, and truncation messages so the user always has a way
/// forward.
pub fn navigation_quick_reply() -> QuickReply {
    QuickReply {
        items: vec![
            QuickReplyItem::message("使用說明", "help"),
            QuickReplyItem::message("課程查詢", "課程 微積分"),
            QuickReplyItem::message("系所聯絡", "聯繫 資工系"),
        ],
    }
}

/// The help reply. Mentions the natural-language path only when an
/// intent parser is actually configured.
pub fn help_messages(nlu_enabled: bool) -> Vec<OutMessage> {
    let text = if nlu_enabled {
        "可以直接輸入關鍵字查詢：課程、學號、系所聯絡方式。\n也可以用一句話描述想查什麼，我會試著理解。"
    } else {
        "可以輸入關鍵字查詢：課程、學號、系所聯絡方式。\n輸入 help 隨時叫出這份說明。"
    };
    vec![OutMessage::text_with_quick_reply(
        text,
        navigation_quick_reply(),
    )]
}

/// Greeting for a new follower.
pub fn greeting_messages() -> Vec<OutMessage> {
    vec![OutMessage::text_with_quick_reply(
        "嗨！我是校園小幫手，可以查課程、學號和系所聯絡方式。",
        navigation_quick_reply(),
    )]
}

/// Reply for a conversation that is sending too fast. 1-on-1 only; in
/// groups the ingress stays silent instead.
pub fn rate_limited_message() -> OutMessage {
    OutMessage::text("⏳ 訊息有點太多了，請稍等幾秒再試一次。")
}

/// Reply for an exhausted LLM quota, with the estimated reset and the
/// deterministic alternatives.
pub fn quota_exhausted_message(per_hour: u32, reset_minutes: u64) -> OutMessage {
    OutMessage::text_with_quick_reply(
        format!(
            "🤖 智慧查詢每小時限 {per_hour} 次，約 {reset_minutes} 分鐘後恢復。\n先試試關鍵字查詢吧！"
        ),
        navigation_quick_reply(),
    )
}

/// Reply for an over-long message.
pub fn message_too_long(limit: usize) -> OutMessage {
    OutMessage::text(format!("訊息太長了，最多 {limit} 個字。"))
}

/// Reply for a postback whose payload is oversized or stale.
pub fn postback_expired_message() -> OutMessage {
    OutMessage::text("這個操作已經過期了，請重新查詢一次。")
}

/// Appended when a reply was truncated to the per-reply cap.
pub fn truncation_notice() -> OutMessage {
    OutMessage::text_with_quick_reply(
        "結果太多只顯示前幾筆，可以縮小關鍵字再查一次。",
        navigation_quick_reply(),
    )
}

/// The built-in help handler; the terminal entry of the pipeline.
pub struct HelpHandler {
    nlu_enabled: bool,
}

impl HelpHandler {
    /// `nlu_enabled` tailors the help text to the configured features.
    pub fn new(nlu_enabled: bool) -> Self {
        Self { nlu_enabled }
    }
}

#[async_trait]
impl MessageHandler for HelpHandler {
    fn name(&self) -> &'static str {
        "help"
    }

    fn can_handle(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        lower == "help" || lower == "使用說明" || lower == "說明"
    }

    async fn handle(&self, _text: &str) -> Result<Vec<OutMessage>, HandlerError> {
        Ok(help_messages(self.nlu_enabled))
    }
}
