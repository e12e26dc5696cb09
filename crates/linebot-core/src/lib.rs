//! Core infrastructure for the linebot runtime.
//!
//! This crate provides shared functionality used across the linebot crates:
//! - Event system for observability
//! - Request-scoped conversation context

pub mod context;
pub mod events;

pub use context::{chat_scope, current_chat_id};
pub use events::{EventListener, RuntimeEvent};
