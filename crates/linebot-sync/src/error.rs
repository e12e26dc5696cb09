/// Error type for object-store access and the components built on it.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The object does not exist. Callers treat this as a state, not a
    /// failure: an absent lock is acquirable, an absent snapshot means
    /// nothing to apply yet.
    #[error("object not found")]
    NotFound,

    /// The store answered with an unexpected status.
    #[error("object store returned status {status}")]
    Status { status: u16, body: String },

    /// Transport failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Local file I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored JSON object failed to round-trip.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The schedule object vanished between a create race and the reload.
    #[error("schedule state missing after create race")]
    StateInconsistent,

    /// Optimistic CAS lost three times in a row.
    #[error("conditional update retries exhausted")]
    CasExhausted,

    /// The snapshot engine refused an operation.
    #[error("engine error: {0}")]
    Engine(String),
}

impl SyncError {
    /// True for the absent-object sentinel.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound)
    }

    /// True when the underlying transport gave up waiting; used to bypass
    /// retry ladders for intentionally abandoned requests.
    pub fn is_cancelled(&self) -> bool {
        match self {
            SyncError::Http(e) => e.is_timeout(),
            _ => false,
        }
    }
}
