//! Request-scoped conversation context.
//!
//! The webhook ingress knows which conversation an event belongs to; the
//! rate limiters deep inside the reply path need that key too. Rather than
//! threading a chat id through every function signature in between, the id
//! rides on a task-local that is set once per processed event and read by
//! whoever needs it.

tokio::task_local! {
    static CHAT_ID: String;
}

/// Runs `fut` with the given chat id attached to the current task.
///
/// Nested scopes shadow the outer id for the duration of the inner future.
pub async fn chat_scope<F>(chat_id: String, fut: F) -> F::Output
where
    F: std::future::Future,
{
    CHAT_ID.scope(chat_id, fut).await
}

/// Returns the chat id attached to the current task, if any.
///
/// Outside a [`chat_scope`] this returns `None`; callers treat that as the
/// anonymous conversation and fall back to their own defaults.
pub fn current_chat_id() -> Option<String> {
    CHAT_ID.try_with(|id| id.clone()).ok()
}
