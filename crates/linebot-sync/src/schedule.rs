use crate::error::SyncError;
use crate::store::ObjectStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const SCHEDULE_CONTENT_TYPE: &str = "application/json";
const LOAD_ATTEMPTS: u32 = 3;
const UPDATE_ATTEMPTS: u32 = 3;

/// Shared "last run" timestamps, epoch seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleState {
    /// When any instance last refreshed the upstream source.
    pub last_refresh: i64,
    /// When any instance last ran cache cleanup.
    pub last_cleanup: i64,
    /// When this object was last written. Informational; nothing fences
    /// on it.
    pub updated_at: i64,
}

/// The schedule object, read and updated with optimistic ETag CAS.
///
/// Multiple instances coordinate their shared maintenance work through
/// this single object: whoever CASes a fresh timestamp in first runs the
/// job, everyone else observes the update and skips.
pub struct ScheduleStore {
    store: Arc<dyn ObjectStore>,
    key: String,
}

impl ScheduleStore {
    /// Creates a store over the given key.
    pub fn new(store: Arc<dyn ObjectStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Loads the state with bounded retries. Absence is `Ok(None)`, not
    /// an error. Abandoned requests (client-side timeouts) bypass the
    /// retry ladder; they are intentional signals, not flakiness.
    pub async fn load(&self) -> Result<Option<(ScheduleState, String)>, SyncError> {
        let mut last_err = None;
        for attempt in 1..=LOAD_ATTEMPTS {
            match self.store.get(&self.key).await {
                Ok((body, etag)) => {
                    // A malformed object is returned as the zero state
                    // with its live etag, so the next update simply
                    // rewrites it in place.
                    let state = match serde_json::from_slice::<ScheduleState>(&body) {
                        Ok(state) => state,
                        Err(err) => {
                            tracing::warn!(key = %self.key, error = %err, "malformed schedule state, treating as zero");
                            ScheduleState::default()
                        }
                    };
                    return Ok(Some((state, etag)));
                }
                Err(SyncError::NotFound) => return Ok(None),
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => {
                    tracing::debug!(attempt, error = %err, "schedule load failed");
                    last_err = Some(err);
                    if attempt < LOAD_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(100) * attempt).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or(SyncError::StateInconsistent))
    }

    /// Loads the state, creating a fresh one when absent. A lost create
    /// race reloads the winner's object.
    pub async fn ensure(&self) -> Result<(ScheduleState, String), SyncError> {
        if let Some(found) = self.load().await? {
            return Ok(found);
        }

        let fresh = ScheduleState {
            updated_at: Utc::now().timestamp(),
            ..ScheduleState::default()
        };
        let body = serde_json::to_vec(&fresh)?;
        if let Some(etag) = self
            .store
            .put_if_absent(&self.key, body, SCHEDULE_CONTENT_TYPE)
            .await?
        {
            return Ok((fresh, etag));
        }

        // Another instance created it between our load and our put.
        match self.load().await? {
            Some(found) => Ok(found),
            None => Err(SyncError::StateInconsistent),
        }
    }

    /// Applies `mutate` under optimistic CAS, stamping `updated_at`.
    /// Gives up after three lost races.
    pub async fn update<F>(&self, mut mutate: F) -> Result<ScheduleState, SyncError>
    where
        F: FnMut(&mut ScheduleState),
    {
        for _ in 0..UPDATE_ATTEMPTS {
            let (mut state, etag) = self.ensure().await?;
            mutate(&mut state);
            state.updated_at = Utc::now().timestamp();

            let body = serde_json::to_vec(&state)?;
            if self
                .store
                .put_if_match(&self.key, body, &etag, SCHEDULE_CONTENT_TYPE)
                .await?
                .is_some()
            {
                return Ok(state);
            }

            #[cfg(feature = "metrics")]
            metrics::counter!("linebot_schedule_cas_retries_total").increment(1);

            tracing::debug!(key = %self.key, "schedule CAS lost, retrying");
        }
        Err(SyncError::CasExhausted)
    }
}
