//! The slice of the LINE Messaging API this service touches: webhook
//! payload shapes, reply messages, signature verification, and the reply
//! client.

mod client;
mod signature;
mod types;

pub use client::{LineApiError, LineClient, ReplyClient};
pub use signature::{sign_body, verify_signature};
pub use types::{
    Event, Mention, Mentionee, MessageContent, OutMessage, Postback, QuickAction, QuickReply,
    QuickReplyItem, Source, WebhookPayload,
};
