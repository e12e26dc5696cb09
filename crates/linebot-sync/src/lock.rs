use crate::error::SyncError;
use crate::store::ObjectStore;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

const LOCK_CONTENT_TYPE: &str = "application/json";

/// The JSON record stored under the lock key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    /// Opaque holder id, fresh per lock instance.
    pub owner: String,
    /// Wall-clock expiry. Wall clock is required here: the record is read
    /// by other machines.
    pub expires_at: DateTime<Utc>,
}

/// TTL lock over an object store, with steal-on-expiry.
///
/// A holder that stops renewing simply lets the record expire; the next
/// acquirer observes the stale record and overwrites it with an
/// ETag-conditional write. The store's conditional PUT is the arbiter:
/// two concurrent stealers race on the same ETag and exactly one wins.
pub struct LeaderLock {
    store: Arc<dyn ObjectStore>,
    key: String,
    ttl: Duration,
    owner_id: String,
    etag: Mutex<Option<String>>,
}

impl LeaderLock {
    /// Creates a lock handle with a fresh owner id.
    pub fn new(store: Arc<dyn ObjectStore>, key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            key: key.into(),
            ttl,
            owner_id: uuid::Uuid::new_v4().to_string(),
            etag: Mutex::new(None),
        }
    }

    /// This instance's owner id.
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// The configured TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The renew cadence: a third of the TTL, but never below ten seconds.
    pub fn renew_interval(&self) -> Duration {
        (self.ttl / 3).max(Duration::from_secs(10))
    }

    fn record(&self) -> Result<Vec<u8>, SyncError> {
        let record = LockRecord {
            owner: self.owner_id.clone(),
            expires_at: Utc::now()
                + ChronoDuration::from_std(self.ttl).unwrap_or(ChronoDuration::seconds(60)),
        };
        Ok(serde_json::to_vec(&record)?)
    }

    /// Attempts to take the lock. Returns false when another holder's
    /// record is still live.
    pub async fn acquire(&self) -> Result<bool, SyncError> {
        // Vacant key: plain conditional create wins or loses atomically.
        if let Some(etag) = self
            .store
            .put_if_absent(&self.key, self.record()?, LOCK_CONTENT_TYPE)
            .await?
        {
            *self.etag.lock().unwrap() = Some(etag);
            tracing::info!(key = %self.key, owner = %self.owner_id, "lock acquired");
            return Ok(true);
        }

        // Occupied: decide between "held" and "stale".
        let (body, current_etag) = match self.store.get(&self.key).await {
            Ok(found) => found,
            // Deleted between our create attempt and the read; next
            // acquire call will take the vacant path.
            Err(SyncError::NotFound) => return Ok(false),
            Err(err) => return Err(err),
        };

        let expired = match serde_json::from_slice::<LockRecord>(&body) {
            Ok(record) => record.expires_at <= Utc::now(),
            // A record we cannot parse cannot be honoured.
            Err(_) => true,
        };
        if !expired {
            return Ok(false);
        }

        match self
            .store
            .put_if_match(&self.key, self.record()?, &current_etag, LOCK_CONTENT_TYPE)
            .await?
        {
            Some(etag) => {
                *self.etag.lock().unwrap() = Some(etag);
                tracing::info!(key = %self.key, owner = %self.owner_id, "stale lock stolen");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Refreshes the expiry of a held lock. Returns false when the record
    /// moved under us, which means the lock is lost.
    pub async fn renew(&self) -> Result<bool, SyncError> {
        let held_etag = match self.etag.lock().unwrap().clone() {
            Some(etag) => etag,
            None => return Ok(false),
        };

        match self
            .store
            .put_if_match(&self.key, self.record()?, &held_etag, LOCK_CONTENT_TYPE)
            .await?
        {
            Some(etag) => {
                *self.etag.lock().unwrap() = Some(etag);
                Ok(true)
            }
            None => {
                *self.etag.lock().unwrap() = None;
                tracing::warn!(key = %self.key, owner = %self.owner_id, "lock lost on renew");
                Ok(false)
            }
        }
    }

    /// Releases the lock if we still own it. Deleting a lock stolen by
    /// someone else would be sabotage, so the record is re-read and the
    /// delete is skipped on an owner mismatch. An absent record is fine.
    pub async fn release(&self) -> Result<(), SyncError> {
        *self.etag.lock().unwrap() = None;

        let body = match self.store.get(&self.key).await {
            Ok((body, _)) => body,
            Err(SyncError::NotFound) => return Ok(()),
            Err(err) => return Err(err),
        };

        let ours = serde_json::from_slice::<LockRecord>(&body)
            .map(|record| record.owner == self.owner_id)
            .unwrap_or(false);
        if ours {
            self.store.delete(&self.key).await?;
            tracing::info!(key = %self.key, owner = %self.owner_id, "lock released");
        }
        Ok(())
    }

    /// True while this handle believes it holds the lock. Only `renew`
    /// keeps that belief honest.
    pub fn held(&self) -> bool {
        self.etag.lock().unwrap().is_some()
    }
}
