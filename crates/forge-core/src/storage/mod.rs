//! Optional, non-durable snapshot persistence for `OrchestrationContext`.
//!
//! Orchestration is not durable across restarts; this store exists purely
//! so a deployment can inspect or recover a best-effort snapshot after a
//! crash, not so a restart can resume a plan mid-flight. A thin `rusqlite`
//! wrapper (`params!`, one owned `Connection`) mirrors the rest of
//! `storage/`.

mod snapshot;

pub use snapshot::SnapshotStore;

use std::time::{SystemTime, UNIX_EPOCH};

#[inline]
pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
