//! Staleness tracking for the local data cache.
//!
//! The time of the last sync is stored as decimal epoch seconds in
//! `<work_dir>/last_update.txt`. A missing record means "never synced" and is
//! read as epoch 0.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::config::RefreshMode;

/// File name of the staleness record under `work_dir`.
pub const RECORD_FILE: &str = "last_update.txt";

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Why the cache was (or was not) considered stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshReason {
    /// `data_refresh_mode` is `always`.
    Always,
    /// The refresh interval elapsed since the last sync.
    IntervalElapsed,
    /// `auto` mode and the local cache is missing or empty.
    CacheEmpty,
    /// Nothing calls for a refresh.
    Fresh,
}

impl fmt::Display for RefreshReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => write!(f, "refresh mode is always"),
            Self::IntervalElapsed => write!(f, "data may be stale"),
            Self::CacheEmpty => write!(f, "local cache is empty"),
            Self::Fresh => write!(f, "local data is fresh"),
        }
    }
}

/// Outcome of the staleness check for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncDecision {
    pub should_refresh: bool,
    pub reason: RefreshReason,
    /// Epoch seconds of the previous sync (0 when never synced).
    pub last_update: i64,
}

/// Current time as epoch seconds.
pub fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Path of the staleness record for a work directory.
pub fn record_path(work_dir: &Path) -> PathBuf {
    work_dir.join(RECORD_FILE)
}

/// Read the last sync time; 0 when the record is missing.
///
/// A record that cannot be parsed, or holds a negative time, is treated as
/// missing so the next sync rewrites it.
pub fn read_record(work_dir: &Path) -> io::Result<i64> {
    let path = record_path(work_dir);
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    match content.trim().parse::<i64>() {
        Ok(epoch) if epoch >= 0 => Ok(epoch),
        Ok(epoch) => {
            tracing::warn!(path = %path.display(), epoch, "ignoring negative staleness record");
            Ok(0)
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable staleness record");
            Ok(0)
        }
    }
}

/// Overwrite the staleness record.
pub fn write_record(work_dir: &Path, epoch_seconds: i64) -> io::Result<()> {
    std::fs::create_dir_all(work_dir)?;
    std::fs::write(record_path(work_dir), epoch_seconds.to_string())
}

fn is_missing_or_empty(dir: &Path) -> bool {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}

/// Decide whether the local cache should be refreshed.
///
/// Rules are checked in order and the first match wins: `always` mode, the
/// refresh interval elapsing, then `auto` mode with an empty cache.
pub fn is_stale(
    work_dir: &Path,
    refresh_mode: RefreshMode,
    refresh_interval_days: f64,
    local_cache_dir: &Path,
    now: i64,
) -> io::Result<SyncDecision> {
    let last_update = read_record(work_dir)?;
    let decide = |should_refresh, reason| SyncDecision {
        should_refresh,
        reason,
        last_update,
    };

    if refresh_mode == RefreshMode::Always {
        return Ok(decide(true, RefreshReason::Always));
    }

    let age_days = now.saturating_sub(last_update) as f64 / SECONDS_PER_DAY;
    if age_days >= refresh_interval_days {
        return Ok(decide(true, RefreshReason::IntervalElapsed));
    }

    if refresh_mode == RefreshMode::Auto && is_missing_or_empty(local_cache_dir) {
        return Ok(decide(true, RefreshReason::CacheEmpty));
    }

    Ok(decide(false, RefreshReason::Fresh))
}
