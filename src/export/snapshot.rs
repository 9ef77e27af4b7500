//! Snapshot (.ping) codec.
//!
//! A snapshot bundles the full sample history with a copy of the running
//! statistics and the UTC time it was created:
//!
//! ```json
//! {
//!   "history": [{ "time": "10:00:02", "roundTrip": 23 }],
//!   "stats": { "average": 23, "min": {..}, "max": {..}, "roundTripThreshold": 30,
//!              "overThreshold": 0, "failedRequests": 0, "totalRequests": 1 },
//!   "createdAtUTC": "2024-03-01T09:00:02Z"
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{MonitorError, Result};
use crate::state::{Sample, Statistics};

/// File extension used for snapshot files
pub const SNAPSHOT_EXTENSION: &str = "ping";

/// Maximum snapshot file size accepted on load (10MB)
pub const MAX_SNAPSHOT_SIZE: u64 = 10 * 1024 * 1024;

/// Decoded snapshot contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub history: Vec<Sample>,
    pub stats: Statistics,
    #[serde(rename = "createdAtUTC")]
    pub created_at: DateTime<Utc>,
}

/// Borrowing view used for encoding without cloning the history
#[derive(Serialize)]
struct SnapshotRef<'a> {
    history: &'a [Sample],
    stats: &'a Statistics,
    #[serde(rename = "createdAtUTC")]
    created_at: &'a DateTime<Utc>,
}

/// Encode history, stats and creation time as a pretty-printed JSON document
pub fn encode(history: &[Sample], stats: &Statistics, created_at: DateTime<Utc>) -> Result<Vec<u8>> {
    let doc = SnapshotRef {
        history,
        stats,
        created_at: &created_at,
    };
    Ok(serde_json::to_vec_pretty(&doc)?)
}

/// Decode a snapshot document. Nothing is returned unless every field is valid.
pub fn decode(bytes: &[u8]) -> Result<Snapshot> {
    let snapshot: Snapshot = serde_json::from_slice(bytes)?;
    validate(&snapshot.stats)?;
    Ok(snapshot)
}

fn validate(stats: &Statistics) -> Result<()> {
    if stats.failed_requests > stats.total_requests {
        return Err(MonitorError::MalformedSnapshot(format!(
            "failedRequests ({}) exceeds totalRequests ({})",
            stats.failed_requests, stats.total_requests
        )));
    }
    if stats.over_threshold > stats.successful() {
        return Err(MonitorError::MalformedSnapshot(format!(
            "overThreshold ({}) exceeds successful requests ({})",
            stats.over_threshold,
            stats.successful()
        )));
    }
    Ok(())
}

/// Encode and write a snapshot file.
///
/// Bytes go to a sibling temp file which is then renamed over `path`, so a
/// failed write never leaves a truncated snapshot behind.
pub fn save_snapshot(
    path: &Path,
    history: &[Sample],
    stats: &Statistics,
    created_at: DateTime<Utc>,
) -> Result<()> {
    if history.is_empty() {
        return Err(MonitorError::EmptyHistory);
    }

    let bytes = encode(history, stats, created_at)?;
    let tmp = temp_path(path);

    let written = File::create(&tmp).and_then(|mut file| {
        file.write_all(&bytes)?;
        file.sync_all()
    });
    if let Err(e) = written.and_then(|_| fs::rename(&tmp, path)) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }

    tracing::info!(path = %path.display(), samples = history.len(), "snapshot saved");
    Ok(())
}

/// Read and decode a snapshot file
pub fn load_snapshot(path: &Path) -> Result<Snapshot> {
    let metadata = fs::metadata(path)?;
    if metadata.len() > MAX_SNAPSHOT_SIZE {
        return Err(MonitorError::MalformedSnapshot(format!(
            "file too large (max 10MB): {}",
            path.display()
        )));
    }

    let bytes = fs::read(path)?;
    let snapshot = decode(&bytes)?;
    tracing::info!(path = %path.display(), samples = snapshot.history.len(), "snapshot loaded");
    Ok(snapshot)
}

/// Append the `.ping` extension when the path has none
pub fn with_snapshot_extension(path: &Path) -> PathBuf {
    if path.extension().is_some() {
        path.to_path_buf()
    } else {
        path.with_extension(SNAPSHOT_EXTENSION)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
