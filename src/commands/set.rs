//! Set Commands
//!
//! A set is a meta record at the root key plus one member record per element
//! under `'S' {len} {key}`. Membership is a point lookup; listing is a prefix
//! scan. Every write stages its member records and the updated meta record
//! into one batch.
//!
//! SPOP and SRANDMEMBER pick the first members in engine key order, i.e. the
//! lexicographically smallest encoded members. The choice is deterministic,
//! not random.

use super::{CommandTable, Context};
use crate::encoding::{self, KeyType};
use crate::error::{CommandError, CommandResult};
use crate::meta;
use crate::reply::Reply;
use crate::storage::{ScanOptions, Storage, WriteBatch};
use bytes::Bytes;
use std::collections::{HashMap, HashSet};

pub(crate) fn register(table: &mut CommandTable) {
    table.add("sadd", -3, sadd);
    table.add("sismember", 3, sismember);
    table.add("spop", -2, spop);
    table.add("srandmember", -2, srandmember);
    table.add("srem", -3, srem);
    table.add("scard", 2, scard);
    table.add("smembers", 2, smembers);
    table.add("sunion", -2, sunion);
    table.add("sunionstore", -3, sunionstore);
    table.add("sdiff", -2, sdiff);
    table.add("sdiffstore", -3, sdiffstore);
}

// ========================================================================
// Helpers
// ========================================================================

/// Members of the set at `root`, prefix stripped, in key order. `limit` 0
/// means all.
fn members(store: &dyn Storage, root: &[u8], limit: usize) -> CommandResult<Vec<Bytes>> {
    let prefix = encoding::collection_prefix(KeyType::Set, root);
    let offset = encoding::member_offset(root);
    let mut out = Vec::new();
    store.scan(&prefix, ScanOptions::keys_only().limit(limit), &mut |k, _| {
        out.push(Bytes::copy_from_slice(&k[offset..]))
    })?;
    Ok(out)
}

/// Members of several sets, type-checked. Missing keys are empty sets.
fn source_sets(store: &dyn Storage, keys: &[Bytes]) -> CommandResult<Vec<Vec<Bytes>>> {
    let mut sets = Vec::with_capacity(keys.len());
    for key in keys {
        match meta::get_meta(store, key, KeyType::Set)? {
            Some(_) => sets.push(members(store, key, 0)?),
            None => sets.push(Vec::new()),
        }
    }
    Ok(sets)
}

#[derive(Clone, Copy)]
enum Combine {
    Union,
    /// Members present in exactly one source set.
    Diff,
}

/// Counts how many source sets hold each member and keeps the members the
/// operation selects, in first-seen order.
fn combine(sets: Vec<Vec<Bytes>>, op: Combine) -> Vec<Bytes> {
    let mut presence: HashMap<Bytes, usize> = HashMap::new();
    let mut order = Vec::new();
    for set in sets {
        for member in set {
            let count = presence.entry(member.clone()).or_insert(0);
            if *count == 0 {
                order.push(member);
            }
            *count += 1;
        }
    }
    match op {
        Combine::Union => order,
        Combine::Diff => order.into_iter().filter(|m| presence[m] == 1).collect(),
    }
}

fn read_combined(ctx: &Context<'_>, keys: &[Bytes], op: Combine) -> CommandResult<Reply> {
    let sets = source_sets(ctx.store(), keys)?;
    Ok(Reply::bulks(combine(sets, op)))
}

/// Replaces `dest` (whatever its type) with a set of `result`.
fn store_combined(ctx: &Context<'_>, op: Combine) -> CommandResult<Reply> {
    let dest = ctx.key(0);
    let sources = &ctx.args[1..];
    let mut all_keys: Vec<&Bytes> = sources.iter().collect();
    all_keys.push(&dest);
    let _guards = ctx.lock_many(&all_keys);

    let store = ctx.store();
    let result = combine(source_sets(store, sources)?, op);

    let mut batch = WriteBatch::new();
    let previous = meta::key_type(store, &dest)?;
    meta::delete_key(store, &mut batch, &dest)?;
    if previous != Some(KeyType::Set) {
        meta::purge_stale(store, &mut batch, KeyType::Set, &dest)?;
    }
    for member in &result {
        batch.put(
            encoding::set_member_key(&dest, member),
            Bytes::from_static(encoding::MEMBER_SENTINEL),
        );
    }
    meta::save_meta(&mut batch, &dest, KeyType::Set, result.len() as u32);
    store.write(batch)?;
    Ok(Reply::integer(result.len() as i64))
}

// ========================================================================
// Commands
// ========================================================================

/// SADD key member [member ...]
fn sadd(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let key = ctx.key(0);
    let store = ctx.store();
    let _guard = ctx.lock(&key);

    let before = meta::get_meta(store, &key, KeyType::Set)?;
    let mut batch = WriteBatch::new();
    if before.is_none() {
        meta::purge_stale(store, &mut batch, KeyType::Set, &key)?;
    }

    let mut staged = HashSet::new();
    let mut added = 0u32;
    for member in &ctx.args[1..] {
        let member_key = encoding::set_member_key(&key, member);
        if !staged.insert(member_key.clone()) {
            continue;
        }
        if before.is_some() && store.exists(&member_key)? {
            continue;
        }
        batch.put(member_key, Bytes::from_static(encoding::MEMBER_SENTINEL));
        added += 1;
    }

    if added > 0 {
        let count = meta::adjust_count(before.unwrap_or(0), added, 0);
        meta::save_meta(&mut batch, &key, KeyType::Set, count);
        store.write(batch)?;
    }
    Ok(Reply::integer(added as i64))
}

/// SISMEMBER key member
fn sismember(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let key = ctx.arg(0);
    let store = ctx.store();
    if meta::get_meta(store, key, KeyType::Set)?.is_none() {
        return Ok(Reply::integer(0));
    }
    let present = store.exists(&encoding::set_member_key(key, ctx.arg(1)))?;
    Ok(Reply::boolean(present))
}

/// SPOP key [count]
fn spop(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let count = match ctx.args.len() {
        1 => None,
        2 => {
            let n = ctx.int_arg(1)?;
            if n < 0 {
                return Err(CommandError::OutOfRange);
            }
            Some(n as usize)
        }
        _ => return Err(CommandError::Syntax),
    };

    let key = ctx.key(0);
    let store = ctx.store();
    let _guard = ctx.lock(&key);

    let before = match meta::get_meta(store, &key, KeyType::Set)? {
        Some(n) => n,
        None => {
            return Ok(match count {
                None => Reply::null(),
                Some(_) => Reply::array(vec![]),
            })
        }
    };
    let take = count.unwrap_or(1);
    if take == 0 {
        return Ok(Reply::array(vec![]));
    }

    let popped = members(store, &key, take)?;
    let mut batch = WriteBatch::new();
    for member in &popped {
        batch.delete(encoding::set_member_key(&key, member));
    }
    let remaining = meta::adjust_count(before, 0, popped.len() as u32);
    meta::save_meta(&mut batch, &key, KeyType::Set, remaining);
    store.write(batch)?;

    Ok(match count {
        None => Reply::optional(popped.into_iter().next()),
        Some(_) => Reply::bulks(popped),
    })
}

/// SRANDMEMBER key [count]
///
/// A negative count is treated as its absolute value.
fn srandmember(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let count = match ctx.args.len() {
        1 => None,
        2 => Some(ctx.int_arg(1)?.unsigned_abs() as usize),
        _ => return Err(CommandError::Syntax),
    };

    let key = ctx.arg(0);
    let store = ctx.store();
    if meta::get_meta(store, key, KeyType::Set)?.is_none() {
        return Ok(match count {
            None => Reply::null(),
            Some(_) => Reply::array(vec![]),
        });
    }

    match count {
        None => Ok(Reply::optional(members(store, key, 1)?.into_iter().next())),
        Some(0) => Ok(Reply::array(vec![])),
        Some(n) => Ok(Reply::bulks(members(store, key, n)?)),
    }
}

/// SREM key member [member ...]
fn srem(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let key = ctx.key(0);
    let store = ctx.store();
    let _guard = ctx.lock(&key);

    let before = match meta::get_meta(store, &key, KeyType::Set)? {
        Some(n) => n,
        None => return Ok(Reply::integer(0)),
    };

    let mut batch = WriteBatch::new();
    let mut seen = HashSet::new();
    let mut removed = 0u32;
    for member in &ctx.args[1..] {
        let member_key = encoding::set_member_key(&key, member);
        if seen.insert(member_key.clone()) && store.exists(&member_key)? {
            batch.delete(member_key);
            removed += 1;
        }
    }

    if removed > 0 {
        let count = meta::adjust_count(before, 0, removed);
        meta::save_meta(&mut batch, &key, KeyType::Set, count);
        store.write(batch)?;
    }
    Ok(Reply::integer(removed as i64))
}

/// SCARD key
fn scard(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let count = meta::get_meta(ctx.store(), ctx.arg(0), KeyType::Set)?.unwrap_or(0);
    Ok(Reply::integer(count as i64))
}

/// SMEMBERS key
fn smembers(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let key = ctx.arg(0);
    let store = ctx.store();
    match meta::get_meta(store, key, KeyType::Set)? {
        Some(_) => Ok(Reply::bulks(members(store, key, 0)?)),
        None => Ok(Reply::array(vec![])),
    }
}

/// SUNION key [key ...]
fn sunion(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    read_combined(ctx, ctx.args, Combine::Union)
}

/// SUNIONSTORE destination key [key ...]
fn sunionstore(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    store_combined(ctx, Combine::Union)
}

/// SDIFF key [key ...]
fn sdiff(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    read_combined(ctx, ctx.args, Combine::Diff)
}

/// SDIFFSTORE destination key [key ...]
fn sdiffstore(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    store_combined(ctx, Combine::Diff)
}
