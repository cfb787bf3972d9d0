//! Per-Key Lock Stripes
//!
//! The engine makes a single write batch atomic, but a handler reads the meta
//! record, checks members and only then commits. Two SADDs on the same key
//! racing through that window would both count the same member as new.
//! [`KeyLocks`] serializes handlers per root key:
//!
//! ```text
//!   hash(root) % NUM_STRIPES ──► Mutex<()>
//!
//!   SADD s a        lock(s) ─ get_meta ─ get members ─ write(batch) ─ unlock
//!   SADD s a                  ........ waits ........           lock(s) ...
//! ```
//!
//! Keys that hash to the same stripe share a mutex; that only costs
//! concurrency. Multi-key commands take their stripes in ascending index
//! order with duplicates removed, so two commands can never wait on each
//! other in a cycle.

use parking_lot::{Mutex, MutexGuard};
use std::hash::{DefaultHasher, Hash, Hasher};

/// Number of lock stripes.
const NUM_STRIPES: usize = 256;

/// Guards held for the duration of one handler.
pub type KeyGuards<'a> = Vec<MutexGuard<'a, ()>>;

pub struct KeyLocks {
    stripes: Box<[Mutex<()>]>,
}

impl std::fmt::Debug for KeyLocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyLocks")
            .field("stripes", &self.stripes.len())
            .finish()
    }
}

impl Default for KeyLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::with_stripes(NUM_STRIPES)
    }

    pub fn with_stripes(n: usize) -> Self {
        let stripes = (0..n.max(1)).map(|_| Mutex::new(())).collect();
        Self { stripes }
    }

    fn stripe_index(&self, key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.stripes.len()
    }

    /// Locks the stripe of a single root key.
    pub fn lock(&self, key: &[u8]) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe_index(key)].lock()
    }

    /// Locks the stripes of several root keys without risking deadlock.
    pub fn lock_many<K: AsRef<[u8]>>(&self, keys: &[K]) -> KeyGuards<'_> {
        let mut indexes: Vec<usize> = keys
            .iter()
            .map(|k| self.stripe_index(k.as_ref()))
            .collect();
        indexes.sort_unstable();
        indexes.dedup();
        indexes.into_iter().map(|i| self.stripes[i].lock()).collect()
    }
}
