use serde::{Deserialize, Serialize};

/// The body of a webhook POST.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub events: Vec<Event>,
}

/// One webhook event. Kinds this service does not handle deserialize to
/// [`Event::Unknown`] and are skipped rather than failing the whole
/// payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Event {
    #[serde(rename_all = "camelCase")]
    Message {
        #[serde(default)]
        reply_token: String,
        source: Source,
        message: MessageContent,
    },
    #[serde(rename_all = "camelCase")]
    Postback {
        #[serde(default)]
        reply_token: String,
        source: Source,
        postback: Postback,
    },
    #[serde(rename_all = "camelCase")]
    Follow {
        #[serde(default)]
        reply_token: String,
        source: Source,
    },
    #[serde(other)]
    Unknown,
}

impl Event {
    /// The reply token, when the event carries one.
    pub fn reply_token(&self) -> Option<&str> {
        match self {
            Event::Message { reply_token, .. }
            | Event::Postback { reply_token, .. }
            | Event::Follow { reply_token, .. } => Some(reply_token),
            Event::Unknown => None,
        }
    }

    /// The event source, when known.
    pub fn source(&self) -> Option<&Source> {
        match self {
            Event::Message { source, .. }
            | Event::Postback { source, .. }
            | Event::Follow { source, .. } => Some(source),
            Event::Unknown => None,
        }
    }
}

/// Where an event came from.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Source {
    #[serde(rename_all = "camelCase")]
    User { user_id: String },
    #[serde(rename_all = "camelCase")]
    Group {
        group_id: String,
        #[serde(default)]
        user_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Room {
        room_id: String,
        #[serde(default)]
        user_id: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl Source {
    /// The conversation key: the group or room when present, otherwise
    /// the user. Rate limiting keys on this so a noisy group shares one
    /// bucket.
    pub fn chat_id(&self) -> Option<&str> {
        match self {
            Source::User { user_id } => Some(user_id),
            Source::Group { group_id, .. } => Some(group_id),
            Source::Room { room_id, .. } => Some(room_id),
            Source::Unknown => None,
        }
    }

    /// True for a 1-on-1 conversation.
    pub fn is_personal(&self) -> bool {
        matches!(self, Source::User { .. })
    }
}

/// Message payload of a message event.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MessageContent {
    #[serde(rename_all = "camelCase")]
    Text {
        #[serde(default)]
        id: String,
        text: String,
        #[serde(default)]
        mention: Option<Mention>,
    },
    #[serde(rename_all = "camelCase")]
    Sticker {
        package_id: String,
        sticker_id: String,
    },
    #[serde(other)]
    Other,
}

/// Mention annotations on a text message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Mention {
    #[serde(default)]
    pub mentionees: Vec<Mentionee>,
}

/// One mentioned entity. `index` and `length` are in code points, not
/// bytes.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mentionee {
    pub index: usize,
    pub length: usize,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub is_self: bool,
}

/// Postback payload.
#[derive(Debug, Clone, Deserialize)]
pub struct Postback {
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub params: Option<serde_json::Value>,
}

/// An outbound reply message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutMessage {
    #[serde(rename_all = "camelCase")]
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        quick_reply: Option<QuickReply>,
    },
    #[serde(rename_all = "camelCase")]
    Sticker {
        package_id: String,
        sticker_id: String,
    },
}

impl OutMessage {
    /// A plain text message.
    pub fn text(text: impl Into<String>) -> Self {
        OutMessage::Text {
            text: text.into(),
            quick_reply: None,
        }
    }

    /// A text message carrying quick-reply buttons.
    pub fn text_with_quick_reply(text: impl Into<String>, quick_reply: QuickReply) -> Self {
        OutMessage::Text {
            text: text.into(),
            quick_reply: Some(quick_reply),
        }
    }

    /// A sticker message.
    pub fn sticker(package_id: impl Into<String>, sticker_id: impl Into<String>) -> Self {
        OutMessage::Sticker {
            package_id: package_id.into(),
            sticker_id: sticker_id.into(),
        }
    }

    /// The text content, for assertions and log sampling.
    pub fn text_content(&self) -> Option<&str> {
        match self {
            OutMessage::Text { text, .. } => Some(text),
            OutMessage::Sticker { .. } => None,
        }
    }
}

/// Quick-reply block attached to a message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuickReply {
    pub items: Vec<QuickReplyItem>,
}

/// One quick-reply button.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuickReplyItem {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub action: QuickAction,
}

impl QuickReplyItem {
    /// A button that sends `text` when tapped.
    pub fn message(label: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: "action",
            action: QuickAction::Message {
                label: label.into(),
                text: text.into(),
            },
        }
    }
}

/// The action behind a quick-reply button.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum QuickAction {
    Message { label: String, text: String },
    Postback { label: String, data: String },
}
