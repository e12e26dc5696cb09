//! Snapshot distribution and cross-instance coordination for the linebot
//! runtime.
//!
//! A fleet of bot instances shares one object store. The instance holding
//! the [`LeaderLock`] compresses the local database and uploads it under a
//! fixed key; followers poll the key's ETag and hot-swap their database
//! when it changes. A small [`ScheduleStore`] object, updated with
//! optimistic ETag CAS, records which instance last ran the shared
//! maintenance jobs.
//!
//! All components speak to the store through the [`ObjectStore`] trait;
//! [`HttpObjectStore`] targets any S3-compatible endpoint and
//! [`MemoryObjectStore`] backs the test suites.

mod error;
mod lock;
mod schedule;
mod snapshot;
mod store;

pub use error::SyncError;
pub use lock::{LeaderLock, LockRecord};
pub use schedule::{ScheduleState, ScheduleStore};
pub use snapshot::{restore_snapshot, SnapshotConfig, SnapshotEngine, SnapshotManager};
pub use store::{HttpObjectStore, MemoryObjectStore, ObjectStore};
