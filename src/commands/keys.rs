//! Key-Space and Expire Commands
//!
//! These work on a root key whatever its type. A collection is handled as its
//! root record plus every record under its content prefixes, so DEL and
//! RENAME expand into one batch that touches all of them.
//!
//! TTLs live on the root record only. Member records of a collection never
//! expire on their own; the engine removes them together with an expired
//! root.

use super::{CommandTable, Context};
use crate::encoding::{self, KeyType};
use crate::error::{CommandError, CommandResult};
use crate::meta;
use crate::reply::Reply;
use crate::storage::{TtlPolicy, WriteBatch};
use std::collections::HashSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::info;

pub(crate) fn register(table: &mut CommandTable) {
    table.add("del", -2, del);
    table.add("exists", -2, exists);
    table.add("type", 2, key_type);
    table.add("rename", 3, rename);
    table.add("renamenx", 3, renamenx);
    table.add("flushdb", 1, flush);
    table.add("flushall", 1, flush);
    table.add("expire", 3, expire);
    table.add("pexpire", 3, pexpire);
    table.add("expireat", 3, expireat);
    table.add("ttl", 2, ttl);
    table.add("pttl", 2, pttl);
    table.add("persist", 2, persist);
}

// ========================================================================
// Delete / Inspect
// ========================================================================

/// DEL key [key ...]
fn del(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let store = ctx.store();
    let _guards = ctx.lock_many(ctx.args);

    let mut batch = WriteBatch::new();
    let mut seen = HashSet::new();
    let mut deleted = 0;
    for key in ctx.args {
        if seen.insert(key) && meta::delete_key(store, &mut batch, key)? {
            deleted += 1;
        }
    }

    if !batch.is_empty() {
        store.write(batch)?;
    }
    Ok(Reply::integer(deleted))
}

/// EXISTS key [key ...]
fn exists(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let store = ctx.store();
    let mut count = 0;
    for key in ctx.args {
        if store.exists(key)? {
            count += 1;
        }
    }
    Ok(Reply::integer(count))
}

/// TYPE key
fn key_type(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let name = meta::key_type(ctx.store(), ctx.arg(0))?
        .map(KeyType::name)
        .unwrap_or("none");
    Ok(Reply::status(name))
}

/// FLUSHDB / FLUSHALL
fn flush(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    ctx.store().drop_all()?;
    info!("Database flushed");
    Ok(Reply::ok())
}

// ========================================================================
// Rename
// ========================================================================

/// Moves `src` (root record and every record it owns) to `dst`, replacing
/// whatever `dst` held. With `only_if_absent`, an existing `dst` leaves both
/// keys untouched and the reply is `false`.
fn move_key(ctx: &Context<'_>, only_if_absent: bool) -> CommandResult<bool> {
    let store = ctx.store();
    let src = ctx.key(0);
    let dst = ctx.key(1);
    let _guards = ctx.lock_many(&[&src, &dst]);

    let raw = store.get(&src)?.ok_or(CommandError::NoSuchKey)?;
    if src == dst {
        return Ok(!only_if_absent);
    }
    if only_if_absent && store.exists(&dst)? {
        return Ok(false);
    }

    let kind = encoding::decode_root(&raw).map(|root| root.kind());
    let remaining = store.ttl(&src)?.remaining();

    let mut batch = WriteBatch::new();
    let previous = meta::key_type(store, &dst)?;
    meta::delete_key(store, &mut batch, &dst)?;

    if let Some(kind) = kind.filter(|k| k.is_collection()) {
        if previous != Some(kind) {
            meta::purge_stale(store, &mut batch, kind, &dst)?;
        }
        for prefix in encoding::content_prefixes(kind, &src) {
            for (record, value) in meta::scan_entries(store, &prefix)? {
                batch.put(encoding::rebase_key(&record, &src, &dst), value);
                batch.delete(record);
            }
        }
    }

    let ttl = match remaining {
        Some(d) => TtlPolicy::Expire(d),
        None => TtlPolicy::Clear,
    };
    batch.delete(src);
    batch.put_with_ttl(dst, raw, ttl);
    store.write(batch)?;
    Ok(true)
}

/// RENAME key newkey
fn rename(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    move_key(ctx, false)?;
    Ok(Reply::ok())
}

/// RENAMENX key newkey
fn renamenx(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    Ok(Reply::boolean(move_key(ctx, true)?))
}

// ========================================================================
// Expire
// ========================================================================

/// Gives `key` a TTL of `secs`. A non-positive TTL deletes the key instead.
fn expire_in(ctx: &Context<'_>, secs: i64) -> CommandResult<Reply> {
    let key = ctx.key(0);
    let store = ctx.store();

    if secs > 0 {
        let applied = store.expire(&key, Duration::from_secs(secs as u64))?;
        return Ok(Reply::boolean(applied));
    }

    let _guard = ctx.lock(&key);
    let mut batch = WriteBatch::new();
    let existed = meta::delete_key(store, &mut batch, &key)?;
    if existed {
        store.write(batch)?;
    }
    Ok(Reply::boolean(existed))
}

/// EXPIRE key seconds
fn expire(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let secs = ctx.int_arg(1)?;
    expire_in(ctx, secs)
}

/// PEXPIRE key milliseconds
///
/// The TTL is kept in whole seconds; the milliseconds are truncated.
fn pexpire(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let millis = ctx.int_arg(1)?;
    expire_in(ctx, millis / 1000)
}

/// EXPIREAT key unix-time-seconds
fn expireat(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let at = ctx.int_arg(1)?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    expire_in(ctx, at.saturating_sub(now))
}

/// TTL key
fn ttl(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    Ok(Reply::integer(ctx.store().ttl(ctx.arg(0))?.as_secs()))
}

/// PTTL key
fn pttl(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    Ok(Reply::integer(ctx.store().ttl(ctx.arg(0))?.as_millis()))
}

/// PERSIST key
fn persist(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    Ok(Reply::boolean(ctx.store().clear_ttl(ctx.arg(0))?))
}
