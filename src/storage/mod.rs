//! Storage Engine Module
//!
//! The command layer never talks to a concrete store. It goes through the
//! [`Storage`] trait, a narrow contract over a flat, ordered byte-key /
//! byte-value engine:
//!
//! - point `get` / `set` / `delete`
//! - atomic [`WriteBatch`] commits (optionally "only if none of the keys exist")
//! - prefix-ordered `scan` with an optional value fetch and a result cap
//! - per-key TTL get / set / clear
//!
//! [`StorageEngine`] is the bundled implementation: a single ordered map
//! behind a `RwLock`, with lazy expiry, a background [`ExpirySweeper`] and
//! snapshot persistence.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │   RwLock<BTreeMap<Bytes, Entry>>   (ordered, prefix scans)  │
//! └─────────────────────────────────────────────────────────────┘
//!            ▲                                   ▲
//!            │                                   │
//!  ┌─────────┴─────────┐               ┌─────────┴─────────┐
//!  │   ExpirySweeper   │               │     snapshot      │
//!  │ (Background Task) │               │  (bincode file)   │
//!  └───────────────────┘               └───────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use raptorkv::storage::{ScanOptions, Storage, StorageEngine, WriteBatch};
//! use bytes::Bytes;
//!
//! let engine = StorageEngine::new();
//!
//! let mut batch = WriteBatch::new();
//! batch.put(Bytes::from("user:1"), Bytes::from("a"));
//! batch.put(Bytes::from("user:2"), Bytes::from("b"));
//! engine.write(batch).unwrap();
//!
//! let mut keys = Vec::new();
//! engine
//!     .scan(b"user:", ScanOptions::keys_only(), &mut |k, _| keys.push(k.to_vec()))
//!     .unwrap();
//! assert_eq!(keys.len(), 2);
//! ```

pub mod engine;
pub mod error;
pub mod expiry;
pub mod snapshot;

use bytes::Bytes;
use std::fmt;
use std::time::Duration;

// Re-export commonly used types
pub use engine::{Entry, StorageEngine, StorageStats};
pub use error::{StoreError, StoreResult};
pub use expiry::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper};

/// What a put does to the TTL already attached to its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlPolicy {
    /// Keep whatever expiry the key already has (none for new keys).
    Keep,
    /// Drop any existing expiry.
    Clear,
    /// Replace the expiry with `now + duration`.
    Expire(Duration),
}

/// A single mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put {
        key: Bytes,
        value: Bytes,
        ttl: TtlPolicy,
    },
    Delete {
        key: Bytes,
    },
}

impl WriteOp {
    pub fn key(&self) -> &Bytes {
        match self {
            WriteOp::Put { key, .. } | WriteOp::Delete { key } => key,
        }
    }
}

/// An ordered list of puts and deletes committed atomically.
///
/// Ops are applied in insertion order, so a delete followed by a put of the
/// same key leaves the put in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Puts a value, keeping any TTL the key already carries.
    pub fn put(&mut self, key: Bytes, value: Bytes) {
        self.put_with_ttl(key, value, TtlPolicy::Keep);
    }

    pub fn put_with_ttl(&mut self, key: Bytes, value: Bytes, ttl: TtlPolicy) {
        self.ops.push(WriteOp::Put { key, value, ttl });
    }

    pub fn delete(&mut self, key: Bytes) {
        self.ops.push(WriteOp::Delete { key });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Options for [`Storage::scan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    /// When false the callback receives an empty value slice.
    pub fetch_values: bool,
    /// Maximum number of records visited; 0 means unbounded.
    pub limit: usize,
}

impl ScanOptions {
    pub fn keys_only() -> Self {
        Self {
            fetch_values: false,
            limit: 0,
        }
    }

    pub fn with_values() -> Self {
        Self {
            fetch_values: true,
            limit: 0,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Remaining lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlState {
    /// The key does not exist (or has already expired).
    Missing,
    /// The key exists and never expires.
    Persistent,
    /// The key expires after the given duration.
    Expires(Duration),
}

impl TtlState {
    /// Redis-style seconds: `-2` missing, `-1` persistent.
    pub fn as_secs(&self) -> i64 {
        match self {
            TtlState::Missing => -2,
            TtlState::Persistent => -1,
            TtlState::Expires(d) => d.as_secs() as i64,
        }
    }

    /// Redis-style milliseconds: `-2` missing, `-1` persistent.
    pub fn as_millis(&self) -> i64 {
        match self {
            TtlState::Missing => -2,
            TtlState::Persistent => -1,
            TtlState::Expires(d) => d.as_millis() as i64,
        }
    }

    pub fn remaining(&self) -> Option<Duration> {
        match self {
            TtlState::Expires(d) => Some(*d),
            _ => None,
        }
    }
}

/// The contract between the command layer and an ordered key-value engine.
///
/// Every method is atomic on its own; nothing spans two calls. Callers that
/// need read-modify-write consistency serialize themselves (see
/// `commands::KeyLocks`).
///
/// `scan` invokes `on_each` while the engine holds its read lock, so the
/// callback must not call back into the same store.
pub trait Storage: Send + Sync + fmt::Debug {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Bytes>>;

    fn set(&self, key: Bytes, value: Bytes, ttl: Option<Duration>) -> StoreResult<()>;

    /// Deletes the given keys, returning how many existed.
    fn delete(&self, keys: &[Bytes]) -> StoreResult<usize>;

    /// Applies every op in the batch atomically.
    fn write(&self, batch: WriteBatch) -> StoreResult<()>;

    /// Applies the batch only if none of its put keys exist. Returns whether
    /// the batch was written.
    fn write_if_none_exist(&self, batch: WriteBatch) -> StoreResult<bool>;

    fn scan(
        &self,
        prefix: &[u8],
        opts: ScanOptions,
        on_each: &mut dyn FnMut(&[u8], &[u8]),
    ) -> StoreResult<()>;

    fn ttl(&self, key: &[u8]) -> StoreResult<TtlState>;

    /// Attaches an expiry to an existing key. Returns false if it is missing.
    fn expire(&self, key: &[u8], ttl: Duration) -> StoreResult<bool>;

    /// Removes the expiry of a key. Returns false if the key is missing or
    /// had no expiry.
    fn clear_ttl(&self, key: &[u8]) -> StoreResult<bool>;

    fn drop_all(&self) -> StoreResult<()>;

    /// Number of live records (all encodings, not user keys).
    fn len(&self) -> StoreResult<usize>;

    /// Flushes buffered state to durable storage, if any is configured.
    fn sync(&self) -> StoreResult<()>;

    /// Writes several key/value pairs atomically, clearing their TTLs.
    fn batch_set(&self, entries: Vec<(Bytes, Bytes)>) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        for (key, value) in entries {
            batch.put_with_ttl(key, value, TtlPolicy::Clear);
        }
        self.write(batch)
    }

    fn exists(&self, key: &[u8]) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}
