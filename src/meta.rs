//! Type Registry / Meta Bookkeeping
//!
//! Every collection root key carries a meta record `[tag][count]`. The helpers
//! here read it with type checking and stage its updates into the same
//! [`WriteBatch`] as the member writes, so the stored count and the number of
//! records under the collection prefix move together.
//!
//! ```text
//!   get_meta(root, Set) ──► None          collection absent
//!                      ──► Some(count)
//!                      ──► WrongType     root owned by another type
//!
//!   save_meta(batch, root, Set, 0)   ──► delete root
//!   save_meta(batch, root, Set, n)   ──► put root = 'S' n   (TTL kept)
//! ```

use crate::encoding::{self, KeyType, RootValue};
use crate::error::{CommandError, CommandResult};
use crate::storage::{ScanOptions, Storage, WriteBatch};
use bytes::Bytes;
use tracing::warn;

/// Reads and decodes the root record at `key`.
pub fn read_root(store: &dyn Storage, key: &[u8]) -> CommandResult<Option<RootValue>> {
    match store.get(key)? {
        None => Ok(None),
        Some(raw) => match encoding::decode_root(&raw) {
            Some(root) => Ok(Some(root)),
            None => {
                warn!(
                    key = %String::from_utf8_lossy(key),
                    len = raw.len(),
                    "Malformed root record"
                );
                Err(CommandError::Corrupted(
                    String::from_utf8_lossy(key).into_owned(),
                ))
            }
        },
    }
}

/// Element count of the collection at `root`, or `None` when it does not
/// exist. Fails with `WrongType` when `root` holds another type.
pub fn get_meta(store: &dyn Storage, root: &[u8], expected: KeyType) -> CommandResult<Option<u32>> {
    match read_root(store, root)? {
        None => Ok(None),
        Some(RootValue::Collection { kind, count }) if kind == expected => Ok(Some(count)),
        Some(_) => Err(CommandError::WrongType),
    }
}

/// Payload of the string at `key`. Fails with `WrongType` for collections.
pub fn get_string(store: &dyn Storage, key: &[u8]) -> CommandResult<Option<Bytes>> {
    match read_root(store, key)? {
        None => Ok(None),
        Some(RootValue::String(payload)) => Ok(Some(payload)),
        Some(_) => Err(CommandError::WrongType),
    }
}

/// Stages the meta record for `root`: deleted at zero, otherwise written
/// while keeping any TTL the root already has.
pub fn save_meta(batch: &mut WriteBatch, root: &Bytes, kind: KeyType, count: u32) {
    if count == 0 {
        batch.delete(root.clone());
    } else {
        batch.put(root.clone(), encoding::encode_meta(kind, count));
    }
}

/// `before + added - removed`, floored at zero.
pub fn adjust_count(before: u32, added: u32, removed: u32) -> u32 {
    let grown = before.saturating_add(added);
    match grown.checked_sub(removed) {
        Some(count) => count,
        None => {
            warn!(
                before,
                added, removed, "Element count underflow, clamping to zero"
            );
            0
        }
    }
}

pub fn key_type(store: &dyn Storage, key: &[u8]) -> CommandResult<Option<KeyType>> {
    Ok(read_root(store, key)?.map(|root| root.kind()))
}

/// Every key under `prefix`, in engine order.
pub fn scan_keys(store: &dyn Storage, prefix: &[u8]) -> CommandResult<Vec<Bytes>> {
    let mut keys = Vec::new();
    store.scan(prefix, ScanOptions::keys_only(), &mut |k, _| {
        keys.push(Bytes::copy_from_slice(k))
    })?;
    Ok(keys)
}

/// Every `(key, value)` under `prefix`, in engine order.
pub fn scan_entries(store: &dyn Storage, prefix: &[u8]) -> CommandResult<Vec<(Bytes, Bytes)>> {
    let mut entries = Vec::new();
    store.scan(prefix, ScanOptions::with_values(), &mut |k, v| {
        entries.push((Bytes::copy_from_slice(k), Bytes::copy_from_slice(v)))
    })?;
    Ok(entries)
}

/// Stages the deletion of `key` and, for collections, of every record it
/// owns. Returns whether the key existed.
///
/// A root record that does not decode is deleted on its own.
pub fn delete_key(store: &dyn Storage, batch: &mut WriteBatch, key: &Bytes) -> CommandResult<bool> {
    let raw = match store.get(key)? {
        Some(raw) => raw,
        None => return Ok(false),
    };
    for prefix in encoding::owned_prefixes(key, &raw) {
        for record in scan_keys(store, &prefix)? {
            batch.delete(record);
        }
    }
    batch.delete(key.clone());
    Ok(true)
}

/// Stages the removal of records left under a collection prefix whose meta
/// record is gone. Called when a collection is being created. The engine
/// evicts an expired root together with its records, so leftovers only come
/// from a root that expired while a write to it was in flight.
pub fn purge_stale(
    store: &dyn Storage,
    batch: &mut WriteBatch,
    kind: KeyType,
    root: &[u8],
) -> CommandResult<()> {
    let mut purged = 0usize;
    for prefix in encoding::content_prefixes(kind, root) {
        for record in scan_keys(store, &prefix)? {
            batch.delete(record);
            purged += 1;
        }
    }
    if purged > 0 {
        warn!(
            key = %String::from_utf8_lossy(root),
            kind = kind.name(),
            purged,
            "Purged records of an expired collection"
        );
    }
    Ok(())
}
