//! Sorted Set Commands
//!
//! Each member owns two records:
//!
//! ```text
//!   'Z' {len} {key} {member}                  = canonical score text
//!   'z' {len} {key} {score: 8 bytes} {member} = ""
//! ```
//!
//! The first answers ZSCORE with a point lookup. The second is a score-ordered
//! index that writers keep in step with the first: whenever a member's score
//! changes, the old index record is deleted in the same batch that writes the
//! new one. Only the `'Z'` records are counted in the meta record.

use super::{CommandTable, Context};
use crate::encoding::{self, KeyType};
use crate::error::{CommandError, CommandResult};
use crate::meta;
use crate::reply::Reply;
use crate::storage::{Storage, WriteBatch};
use bytes::Bytes;
use std::collections::{HashMap, HashSet};

pub(crate) fn register(table: &mut CommandTable) {
    table.add("zadd", -4, zadd);
    table.add("zscore", 3, zscore);
    table.add("zincrby", 4, zincrby);
    table.add("zcard", 2, zcard);
    table.add("zrem", -3, zrem);
}

// ========================================================================
// Helpers
// ========================================================================

/// Current score of `member`, or `None` when it is not in the set.
fn stored_score(store: &dyn Storage, root: &[u8], member: &[u8]) -> CommandResult<Option<f64>> {
    let member_key = encoding::zset_member_key(root, member);
    match store.get(&member_key)? {
        None => Ok(None),
        Some(raw) => encoding::parse_float(&raw).map(Some).ok_or_else(|| {
            CommandError::Corrupted(String::from_utf8_lossy(&member_key).into_owned())
        }),
    }
}

/// Stages both records of `member` at `score` (stored as `text`), replacing
/// the index record of `old` when the member already had a score.
fn stage_score(
    batch: &mut WriteBatch,
    root: &[u8],
    member: &Bytes,
    old: Option<f64>,
    score: f64,
    text: String,
) {
    if let Some(old) = old {
        batch.delete(encoding::score_key(root, old, member));
    }
    batch.put(encoding::zset_member_key(root, member), Bytes::from(text));
    batch.put(encoding::score_key(root, score, member), Bytes::new());
}

// ========================================================================
// Commands
// ========================================================================

/// ZADD key score member [score member ...]
fn zadd(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    if ctx.args.len() % 2 == 0 {
        return Err(CommandError::Syntax);
    }

    // Parse every score before touching storage. A repeated member keeps
    // its last score.
    let mut order: Vec<Bytes> = Vec::new();
    let mut scores: HashMap<Bytes, f64> = HashMap::new();
    for (i, pair) in ctx.args[1..].chunks_exact(2).enumerate() {
        let score = ctx.float_arg(1 + i * 2)?;
        if scores.insert(pair[1].clone(), score).is_none() {
            order.push(pair[1].clone());
        }
    }

    let key = ctx.key(0);
    let store = ctx.store();
    let _guard = ctx.lock(&key);

    let before = meta::get_meta(store, &key, KeyType::ZSet)?;
    let mut batch = WriteBatch::new();
    if before.is_none() {
        meta::purge_stale(store, &mut batch, KeyType::ZSet, &key)?;
    }

    let mut added = 0u32;
    for member in &order {
        let old = match before {
            Some(_) => stored_score(store, &key, member)?,
            None => None,
        };
        if old.is_none() {
            added += 1;
        }
        let score = scores[member];
        stage_score(&mut batch, &key, member, old, score, encoding::format_float(score));
    }

    let count = meta::adjust_count(before.unwrap_or(0), added, 0);
    meta::save_meta(&mut batch, &key, KeyType::ZSet, count);
    store.write(batch)?;
    Ok(Reply::integer(added as i64))
}

/// ZSCORE key member
fn zscore(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let store = ctx.store();
    let key = ctx.arg(0);
    if meta::get_meta(store, key, KeyType::ZSet)?.is_none() {
        return Ok(Reply::null());
    }
    Ok(Reply::optional(
        store.get(&encoding::zset_member_key(key, ctx.arg(1)))?,
    ))
}

/// ZINCRBY key increment member
///
/// Integer arithmetic only: both the increment and the stored score must be
/// integers.
fn zincrby(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let delta = ctx.int_arg(1)?;
    let key = ctx.key(0);
    let member = ctx.arg(2);
    let store = ctx.store();
    let _guard = ctx.lock(&key);

    let before = meta::get_meta(store, &key, KeyType::ZSet)?;
    let current = match before {
        Some(_) => store.get(&encoding::zset_member_key(&key, member))?,
        None => None,
    };
    let old = match current {
        Some(raw) => Some(encoding::parse_int(&raw).ok_or(CommandError::NotInteger)?),
        None => None,
    };
    let score = old.unwrap_or(0).checked_add(delta).ok_or(CommandError::Overflow)?;

    let mut batch = WriteBatch::new();
    if before.is_none() {
        meta::purge_stale(store, &mut batch, KeyType::ZSet, &key)?;
    }
    let text = score.to_string();
    stage_score(
        &mut batch,
        &key,
        member,
        old.map(|s| s as f64),
        score as f64,
        text.clone(),
    );
    if old.is_none() {
        let count = meta::adjust_count(before.unwrap_or(0), 1, 0);
        meta::save_meta(&mut batch, &key, KeyType::ZSet, count);
    }
    store.write(batch)?;
    Ok(Reply::bulk(text))
}

/// ZCARD key
fn zcard(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let count = meta::get_meta(ctx.store(), ctx.arg(0), KeyType::ZSet)?.unwrap_or(0);
    Ok(Reply::integer(count as i64))
}

/// ZREM key member [member ...]
fn zrem(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let key = ctx.key(0);
    let store = ctx.store();
    let _guard = ctx.lock(&key);

    let before = match meta::get_meta(store, &key, KeyType::ZSet)? {
        Some(n) => n,
        None => return Ok(Reply::integer(0)),
    };

    let mut batch = WriteBatch::new();
    let mut seen = HashSet::new();
    let mut removed = 0u32;
    for member in &ctx.args[1..] {
        if !seen.insert(member) {
            continue;
        }
        if let Some(score) = stored_score(store, &key, member)? {
            batch.delete(encoding::zset_member_key(&key, member));
            batch.delete(encoding::score_key(&key, score, member));
            removed += 1;
        }
    }

    if removed > 0 {
        let count = meta::adjust_count(before, 0, removed);
        meta::save_meta(&mut batch, &key, KeyType::ZSet, count);
        store.write(batch)?;
    }
    Ok(Reply::integer(removed as i64))
}
