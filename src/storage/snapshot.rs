//! Snapshot persistence for [`StorageEngine`](super::StorageEngine).
//!
//! The whole keyspace is written as one bincode document. Expiry deadlines
//! are stored as unix milliseconds so they survive a restart; records whose
//! deadline passed while the process was down are dropped on load.

use crate::storage::{Entry, Storage, StoreResult};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, info};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct PersistedRecord {
    key: Vec<u8>,
    value: Vec<u8>,
    /// Milliseconds since the unix epoch; `None` never expires.
    expiry_unix_ms: Option<u64>,
}

#[derive(Serialize, Deserialize)]
struct PersistedSnapshot {
    version: u32,
    records: Vec<PersistedRecord>,
}

fn deadline_to_unix_ms(deadline: Instant) -> Option<u64> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    SystemTime::now()
        .checked_add(remaining)
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
}

/// `None` means the deadline already passed.
fn unix_ms_to_deadline(ms: u64) -> Option<Instant> {
    let target = SystemTime::UNIX_EPOCH + Duration::from_millis(ms);
    let remaining = target.duration_since(SystemTime::now()).ok()?;
    Some(Instant::now() + remaining)
}

/// Writes `records` to `path` via `<path>.tmp` and a rename, so a crash
/// mid-write never leaves a truncated snapshot behind.
///
/// Concurrent saves to one path must be serialized by the caller;
/// `StorageEngine::sync` holds a lock for this.
pub fn save(records: &[(Bytes, Entry)], path: &Path) -> StoreResult<()> {
    let snapshot = PersistedSnapshot {
        version: SNAPSHOT_VERSION,
        records: records
            .iter()
            .map(|(key, entry)| PersistedRecord {
                key: key.to_vec(),
                value: entry.value.to_vec(),
                expiry_unix_ms: entry.expires_at.and_then(deadline_to_unix_ms),
            })
            .collect(),
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp = path.with_extension("tmp");
    let mut writer = BufWriter::new(File::create(&tmp)?);
    bincode::serialize_into(&mut writer, &snapshot)?;
    writer.flush()?;
    drop(writer);
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Reads a snapshot written by [`save`].
///
/// A missing file surfaces as `StoreError::Io` with `NotFound`, which
/// callers treat as a first run.
pub fn load(path: &Path) -> StoreResult<BTreeMap<Bytes, Entry>> {
    let reader = BufReader::new(File::open(path)?);
    let snapshot: PersistedSnapshot = bincode::deserialize_from(reader)?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(crate::storage::StoreError::Corrupted(format!(
            "unsupported snapshot version {}",
            snapshot.version
        )));
    }

    let mut data = BTreeMap::new();
    let mut dropped = 0usize;
    for record in snapshot.records {
        let expires_at = match record.expiry_unix_ms {
            None => None,
            Some(ms) => match unix_ms_to_deadline(ms) {
                Some(deadline) => Some(deadline),
                None => {
                    dropped += 1;
                    continue;
                }
            },
        };
        data.insert(
            Bytes::from(record.key),
            Entry {
                value: Bytes::from(record.value),
                expires_at,
            },
        );
    }
    if dropped > 0 {
        debug!(dropped, "Skipped records that expired while offline");
    }
    Ok(data)
}

/// Calls `sync` on the store every `interval` until the task is aborted.
///
/// Each flush runs on the blocking pool.
pub async fn run_periodic_flush(store: Arc<dyn Storage>, interval: Duration) {
    info!(interval_secs = interval.as_secs(), "Snapshot flush task started");
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // the first tick fires immediately
    loop {
        ticker.tick().await;
        let started = Instant::now();
        let store = Arc::clone(&store);
        match tokio::task::spawn_blocking(move || store.sync()).await {
            Ok(Ok(())) => debug!(elapsed_ms = started.elapsed().as_millis() as u64, "Snapshot flushed"),
            Ok(Err(e)) => error!(error = %e, "Snapshot flush failed"),
            Err(e) => error!(error = %e, "Snapshot flush task failed"),
        }
    }
}
