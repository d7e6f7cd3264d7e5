//! Centralized filesystem path helpers.
//!
//! All on-disk locations the orchestrator touches, in one place, as small
//! `dirs`-crate based helpers rather than scattering `PathBuf` construction
//! through the codebase.

use std::path::PathBuf;

pub const CONFIG_DIR_NAME: &str = ".forge-orchestrator";

/// `~/.forge-orchestrator`
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// `~/.forge-orchestrator/logs`
pub fn logs_dir() -> PathBuf {
    config_dir().join("logs")
}

/// `~/.forge-orchestrator/memory` — JSONL stores + embedding sidecars for
/// the four memory tiers.
pub fn memory_dir() -> PathBuf {
    config_dir().join("memory")
}

/// `~/.forge-orchestrator/snapshots.db` — optional `OrchestrationContext`
/// snapshot storage (non-durable-by-default per spec's Non-goals).
pub fn snapshot_db_path() -> PathBuf {
    config_dir().join("snapshots.db")
}

pub fn ensure_dir(dir: &std::path::Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)
}
