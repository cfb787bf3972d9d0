//! Ordered Storage Engine with Expiry Support
//!
//! This module implements the bundled [`Storage`] engine for RaptorKV: an
//! ordered map of byte keys to byte values with optional per-key expiry.
//!
//! ## Design Decisions
//!
//! 1. **One ordered map**: prefix scans must walk keys in byte order, so the
//!    data lives in a single `BTreeMap` rather than hash-sharded maps.
//! 2. **Lazy Expiry**: Keys are checked for expiry on access (lazy) plus background cleanup.
//!    Evicting an expired collection root also removes every record under its
//!    content prefixes, so member records never outlive their meta record.
//! 3. **RwLock**: Many concurrent readers, one writer. A [`WriteBatch`] is applied
//!    under a single write lock, which is what makes it atomic.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  RwLock<BTreeMap>                                           │
//! │   "H\0\0\0\x01hf1" -> "v1"        (hash field record)       │
//! │   "S\0\0\0\x01sa"  -> "1"         (set member record)       │
//! │   "h"              -> "H\0\0\0\x01" (meta record)           │
//! │   "s"              -> "S\0\0\0\x01" (meta record)           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::encoding;
use crate::storage::snapshot;
use crate::storage::{
    ScanOptions, Storage, StoreResult, TtlPolicy, TtlState, WriteBatch, WriteOp,
};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::io;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// `now + ttl`; a TTL too large to represent never expires.
fn deadline_after(ttl: Duration) -> Option<Instant> {
    Instant::now().checked_add(ttl)
}

/// Represents a stored value with optional expiry time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The actual value stored
    pub value: Bytes,
    /// When this entry expires (None = never expires)
    pub expires_at: Option<Instant>,
}

impl Entry {
    /// Creates a new entry without expiry.
    pub fn new(value: Bytes) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    /// Creates a new entry with TTL.
    pub fn with_ttl(value: Bytes, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: deadline_after(ttl),
        }
    }

    /// Checks if this entry has expired.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|exp| Instant::now() >= exp)
            .unwrap_or(false)
    }

    /// Returns the remaining lifetime, or None if the entry never expires.
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|exp| exp.saturating_duration_since(Instant::now()))
    }
}

/// The bundled ordered storage engine.
///
/// # Thread Safety
///
/// Designed to be wrapped in an `Arc` and shared by every caller. All
/// operations are thread-safe; batches are applied under one write lock.
///
/// # Example
///
/// ```
/// use raptorkv::storage::{Storage, StorageEngine};
/// use bytes::Bytes;
/// use std::time::Duration;
///
/// let engine = StorageEngine::new();
///
/// engine.set(Bytes::from("name"), Bytes::from("raptor"), None).unwrap();
/// assert_eq!(engine.get(b"name").unwrap(), Some(Bytes::from("raptor")));
///
/// engine
///     .set(Bytes::from("session"), Bytes::from("abc123"), Some(Duration::from_secs(60)))
///     .unwrap();
/// ```
pub struct StorageEngine {
    /// All records, ordered by key bytes
    data: RwLock<BTreeMap<Bytes, Entry>>,

    /// Where `sync` writes snapshots (None = memory only)
    snapshot_path: Option<PathBuf>,

    /// Held across export and file write so only one snapshot is in flight
    save_lock: Mutex<()>,

    /// Statistics: total point reads
    get_count: AtomicU64,

    /// Statistics: total records written
    set_count: AtomicU64,

    /// Statistics: total records deleted
    del_count: AtomicU64,

    /// Statistics: number of expired keys cleaned up
    expired_count: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("records", &self.data.read().len())
            .field("snapshot_path", &self.snapshot_path)
            .field("get_count", &self.get_count.load(Ordering::Relaxed))
            .field("set_count", &self.set_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// Creates an empty, memory-only engine.
    pub fn new() -> Self {
        Self::with_data(BTreeMap::new(), None)
    }

    fn with_data(data: BTreeMap<Bytes, Entry>, snapshot_path: Option<PathBuf>) -> Self {
        Self {
            data: RwLock::new(data),
            snapshot_path,
            save_lock: Mutex::new(()),
            get_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        }
    }

    /// Opens an engine backed by a snapshot file.
    ///
    /// A missing file is a first run and yields an empty engine; `sync`
    /// creates it later.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let data = match snapshot::load(&path) {
            Ok(data) => {
                info!(path = %path.display(), records = data.len(), "Snapshot loaded");
                data
            }
            Err(crate::storage::StoreError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No snapshot found, starting empty");
                BTreeMap::new()
            }
            Err(e) => return Err(e),
        };
        Ok(Self::with_data(data, Some(path)))
    }

    /// Path that `sync` writes to, if persistence is enabled.
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Removes `key` if it is expired, along with the records it owns when it
    /// is a collection root. Must be called with the write lock held.
    ///
    /// Returns the number of records removed.
    fn evict_if_expired(&self, data: &mut BTreeMap<Bytes, Entry>, key: &[u8]) -> usize {
        if !data.get(key).map(Entry::is_expired).unwrap_or(false) {
            return 0;
        }
        let Some(entry) = data.remove(key) else {
            return 0;
        };
        self.expired_count.fetch_add(1, Ordering::Relaxed);

        let mut removed = 1;
        for prefix in encoding::owned_prefixes(key, &entry.value) {
            let owned: Vec<Bytes> = data
                .range::<[u8], _>((Bound::Included(&prefix[..]), Bound::Unbounded))
                .take_while(|(k, _)| k.starts_with(&prefix[..]))
                .map(|(k, _)| k.clone())
                .collect();
            for record in owned {
                data.remove(&record);
                removed += 1;
            }
        }
        if removed > 1 {
            debug!(
                key = %String::from_utf8_lossy(key),
                records = removed,
                "Evicted expired collection"
            );
        }
        removed
    }

    /// Evicts the expired keys that `batch` overwrites or deletes before any
    /// of its ops run, so records staged by the batch under the same prefix
    /// survive. Puts that keep the TTL do not evict.
    fn evict_replaced(&self, data: &mut BTreeMap<Bytes, Entry>, batch: &WriteBatch) {
        for op in batch.ops() {
            match op {
                WriteOp::Put {
                    ttl: TtlPolicy::Keep,
                    ..
                } => {}
                WriteOp::Put { key, .. } | WriteOp::Delete { key } => {
                    self.evict_if_expired(data, key);
                }
            }
        }
    }

    fn apply(&self, data: &mut BTreeMap<Bytes, Entry>, op: WriteOp) {
        match op {
            WriteOp::Put { key, value, ttl } => {
                let expires_at = match ttl {
                    TtlPolicy::Keep => data
                        .get(&key)
                        .filter(|e| !e.is_expired())
                        .and_then(|e| e.expires_at),
                    TtlPolicy::Clear => None,
                    TtlPolicy::Expire(d) => deadline_after(d),
                };
                self.set_count.fetch_add(1, Ordering::Relaxed);
                data.insert(key, Entry { value, expires_at });
            }
            WriteOp::Delete { key } => {
                self.del_count.fetch_add(1, Ordering::Relaxed);
                data.remove(&key);
            }
        }
    }

    /// Copies every live record, for snapshotting.
    pub fn export(&self) -> Vec<(Bytes, Entry)> {
        let data = self.data.read();
        data.iter()
            .filter(|(_, e)| !e.is_expired())
            .map(|(k, e)| (k.clone(), e.clone()))
            .collect()
    }

    /// Cleans up expired keys and the records of expired collections.
    ///
    /// This is called by the background expiry sweeper.
    ///
    /// # Returns
    ///
    /// Returns the number of records that were removed.
    pub fn cleanup_expired(&self) -> u64 {
        let mut data = self.data.write();
        let expired: Vec<Bytes> = data
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        let mut cleaned = 0u64;
        for key in expired {
            cleaned += self.evict_if_expired(&mut data, &key) as u64;
        }
        cleaned
    }

    /// Number of records currently held, including expired ones the sweeper
    /// has not reached yet.
    pub fn raw_len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns database statistics.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            records: self.raw_len() as u64,
            get_ops: self.get_count.load(Ordering::Relaxed),
            set_ops: self.set_count.load(Ordering::Relaxed),
            del_ops: self.del_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
        }
    }
}

impl Storage for StorageEngine {
    /// Gets the value for a key.
    ///
    /// Returns `None` if the key doesn't exist or has expired.
    /// Expired keys are detected and removed on access.
    fn get(&self, key: &[u8]) -> StoreResult<Option<Bytes>> {
        self.get_count.fetch_add(1, Ordering::Relaxed);

        // Fast path under the read lock
        {
            let data = self.data.read();
            match data.get(key) {
                Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // Key exists but is expired - need write lock to remove it
        let mut data = self.data.write();
        self.evict_if_expired(&mut data, key);
        Ok(data.get(key).map(|e| e.value.clone()))
    }

    fn set(&self, key: Bytes, value: Bytes, ttl: Option<Duration>) -> StoreResult<()> {
        let policy = match ttl {
            Some(d) => TtlPolicy::Expire(d),
            None => TtlPolicy::Clear,
        };
        let mut data = self.data.write();
        self.evict_if_expired(&mut data, &key);
        self.apply(&mut data, WriteOp::Put { key, value, ttl: policy });
        Ok(())
    }

    fn delete(&self, keys: &[Bytes]) -> StoreResult<usize> {
        let mut data = self.data.write();
        let mut deleted = 0;
        for key in keys {
            self.del_count.fetch_add(1, Ordering::Relaxed);
            if self.evict_if_expired(&mut data, key) > 0 {
                continue;
            }
            if data.remove(key).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    fn write(&self, batch: WriteBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut data = self.data.write();
        debug!(ops = batch.len(), "Applying write batch");
        self.evict_replaced(&mut data, &batch);
        for op in batch.into_ops() {
            self.apply(&mut data, op);
        }
        Ok(())
    }

    fn write_if_none_exist(&self, batch: WriteBatch) -> StoreResult<bool> {
        let mut data = self.data.write();
        let conflict = batch.ops().iter().any(|op| match op {
            WriteOp::Put { key, .. } => data.get(key).map(|e| !e.is_expired()).unwrap_or(false),
            WriteOp::Delete { .. } => false,
        });
        if conflict {
            return Ok(false);
        }
        self.evict_replaced(&mut data, &batch);
        for op in batch.into_ops() {
            self.apply(&mut data, op);
        }
        Ok(true)
    }

    fn scan(
        &self,
        prefix: &[u8],
        opts: ScanOptions,
        on_each: &mut dyn FnMut(&[u8], &[u8]),
    ) -> StoreResult<()> {
        let data = self.data.read();
        let range = data.range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded));

        let mut visited = 0usize;
        for (key, entry) in range {
            if !key.starts_with(prefix) {
                break;
            }
            if entry.is_expired() {
                continue;
            }
            let value: &[u8] = if opts.fetch_values { &entry.value } else { &[] };
            on_each(key, value);
            visited += 1;
            if opts.limit != 0 && visited >= opts.limit {
                break;
            }
        }
        Ok(())
    }

    fn ttl(&self, key: &[u8]) -> StoreResult<TtlState> {
        let data = self.data.read();
        Ok(match data.get(key) {
            Some(entry) if !entry.is_expired() => match entry.remaining() {
                Some(d) => TtlState::Expires(d),
                None => TtlState::Persistent,
            },
            _ => TtlState::Missing,
        })
    }

    fn expire(&self, key: &[u8], ttl: Duration) -> StoreResult<bool> {
        let mut data = self.data.write();
        self.evict_if_expired(&mut data, key);
        match data.get_mut(key) {
            Some(entry) => {
                entry.expires_at = deadline_after(ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn clear_ttl(&self, key: &[u8]) -> StoreResult<bool> {
        let mut data = self.data.write();
        self.evict_if_expired(&mut data, key);
        match data.get_mut(key) {
            Some(entry) if entry.expires_at.is_some() => {
                entry.expires_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn drop_all(&self) -> StoreResult<()> {
        let mut data = self.data.write();
        let dropped = data.len();
        data.clear();
        info!(records = dropped, "Keyspace dropped");
        Ok(())
    }

    /// Counts records that have not expired. Records of an expired collection
    /// are still counted until the root is evicted.
    fn len(&self) -> StoreResult<usize> {
        let data = self.data.read();
        Ok(data.values().filter(|e| !e.is_expired()).count())
    }

    fn sync(&self) -> StoreResult<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let _saving = self.save_lock.lock();
        // expired collections take their records with them
        self.cleanup_expired();
        let records = self.export();
        snapshot::save(&records, path)?;
        info!(path = %path.display(), records = records.len(), "Snapshot saved");
        Ok(())
    }
}

/// Database statistics.
#[derive(Debug, Clone, Copy)]
pub struct StorageStats {
    /// Number of records currently stored
    pub records: u64,
    /// Total point reads
    pub get_ops: u64,
    /// Total records written
    pub set_ops: u64,
    /// Total records deleted
    pub del_ops: u64,
    /// Total expired keys cleaned up
    pub expired: u64,
}
