//! Hash Commands
//!
//! Field records share the set member layout (`'H' {len} {key} {field}`) but
//! store the field's value instead of a sentinel. The meta count only grows
//! when a field is created, which every writer detects with a point lookup
//! before staging the put.

use super::{CommandTable, Context};
use crate::encoding::{self, KeyType};
use crate::error::{CommandError, CommandResult};
use crate::meta;
use crate::reply::Reply;
use crate::storage::{Storage, WriteBatch};
use bytes::Bytes;
use std::collections::HashSet;

pub(crate) fn register(table: &mut CommandTable) {
    table.add("hset", -4, hset);
    table.add("hsetnx", 4, hsetnx);
    table.add("hget", 3, hget);
    table.add("hexists", 3, hexists);
    table.add("hdel", -3, hdel);
    table.add("hlen", 2, hlen);
    table.add("hstrlen", 3, hstrlen);
    table.add("hincrby", 4, hincrby);
    table.add("hgetall", 2, hgetall);
    table.add("hmset", -4, hmset);
    table.add("hmget", -3, hmget);
    table.add("hkeys", 2, hkeys);
    table.add("hvals", 2, hvals);
}

// ========================================================================
// Helpers
// ========================================================================

/// Value of one field, after checking `root` is a hash.
fn field_value(store: &dyn Storage, root: &[u8], field: &[u8]) -> CommandResult<Option<Bytes>> {
    if meta::get_meta(store, root, KeyType::Hash)?.is_none() {
        return Ok(None);
    }
    Ok(store.get(&encoding::field_key(root, field))?)
}

/// `(field, value)` pairs of the hash at `root`, in field order.
fn fields(store: &dyn Storage, root: &[u8]) -> CommandResult<Vec<(Bytes, Bytes)>> {
    if meta::get_meta(store, root, KeyType::Hash)?.is_none() {
        return Ok(Vec::new());
    }
    let offset = encoding::member_offset(root);
    let prefix = encoding::collection_prefix(KeyType::Hash, root);
    Ok(meta::scan_entries(store, &prefix)?
        .into_iter()
        .map(|(k, v)| (k.slice(offset..), v))
        .collect())
}

/// Writes field/value pairs, returning how many fields were created.
fn write_fields(ctx: &Context<'_>) -> CommandResult<u32> {
    if ctx.args.len() % 2 == 0 {
        return Err(ctx.wrong_arity());
    }
    let key = ctx.key(0);
    let store = ctx.store();
    let _guard = ctx.lock(&key);

    let before = meta::get_meta(store, &key, KeyType::Hash)?;
    let mut batch = WriteBatch::new();
    if before.is_none() {
        meta::purge_stale(store, &mut batch, KeyType::Hash, &key)?;
    }

    let mut staged = HashSet::new();
    let mut added = 0u32;
    for pair in ctx.args[1..].chunks_exact(2) {
        let field_key = encoding::field_key(&key, &pair[0]);
        let is_new = staged.insert(field_key.clone())
            && (before.is_none() || !store.exists(&field_key)?);
        if is_new {
            added += 1;
        }
        batch.put(field_key, pair[1].clone());
    }

    let count = meta::adjust_count(before.unwrap_or(0), added, 0);
    meta::save_meta(&mut batch, &key, KeyType::Hash, count);
    store.write(batch)?;
    Ok(added)
}

// ========================================================================
// Commands
// ========================================================================

/// HSET key field value [field value ...]
fn hset(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    Ok(Reply::integer(write_fields(ctx)? as i64))
}

/// HMSET key field value [field value ...]
fn hmset(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    write_fields(ctx)?;
    Ok(Reply::ok())
}

/// HSETNX key field value
fn hsetnx(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let key = ctx.key(0);
    let store = ctx.store();
    let _guard = ctx.lock(&key);

    let before = meta::get_meta(store, &key, KeyType::Hash)?;
    let field_key = encoding::field_key(&key, ctx.arg(1));
    let mut batch = WriteBatch::new();
    match before {
        Some(_) if store.exists(&field_key)? => return Ok(Reply::integer(0)),
        Some(_) => {}
        None => meta::purge_stale(store, &mut batch, KeyType::Hash, &key)?,
    }

    batch.put(field_key, ctx.arg(2).clone());
    let count = meta::adjust_count(before.unwrap_or(0), 1, 0);
    meta::save_meta(&mut batch, &key, KeyType::Hash, count);
    store.write(batch)?;
    Ok(Reply::integer(1))
}

/// HGET key field
fn hget(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    Ok(Reply::optional(field_value(ctx.store(), ctx.arg(0), ctx.arg(1))?))
}

/// HEXISTS key field
fn hexists(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let value = field_value(ctx.store(), ctx.arg(0), ctx.arg(1))?;
    Ok(Reply::boolean(value.is_some()))
}

/// HDEL key field [field ...]
fn hdel(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let key = ctx.key(0);
    let store = ctx.store();
    let _guard = ctx.lock(&key);

    let before = match meta::get_meta(store, &key, KeyType::Hash)? {
        Some(n) => n,
        None => return Ok(Reply::integer(0)),
    };

    let mut batch = WriteBatch::new();
    let mut seen = HashSet::new();
    let mut removed = 0u32;
    for field in &ctx.args[1..] {
        let field_key = encoding::field_key(&key, field);
        if seen.insert(field_key.clone()) && store.exists(&field_key)? {
            batch.delete(field_key);
            removed += 1;
        }
    }

    if removed > 0 {
        let count = meta::adjust_count(before, 0, removed);
        meta::save_meta(&mut batch, &key, KeyType::Hash, count);
        store.write(batch)?;
    }
    Ok(Reply::integer(removed as i64))
}

/// HLEN key
fn hlen(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let count = meta::get_meta(ctx.store(), ctx.arg(0), KeyType::Hash)?.unwrap_or(0);
    Ok(Reply::integer(count as i64))
}

/// HSTRLEN key field
fn hstrlen(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let len = field_value(ctx.store(), ctx.arg(0), ctx.arg(1))?
        .map(|v| v.len())
        .unwrap_or(0);
    Ok(Reply::integer(len as i64))
}

/// HINCRBY key field increment
fn hincrby(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let delta = ctx.int_arg(2)?;
    let key = ctx.key(0);
    let store = ctx.store();
    let _guard = ctx.lock(&key);

    let before = meta::get_meta(store, &key, KeyType::Hash)?;
    let field_key = encoding::field_key(&key, ctx.arg(1));
    let current = match before {
        Some(_) => store.get(&field_key)?,
        None => None,
    };

    let created = current.is_none();
    let value = match current {
        Some(raw) => encoding::parse_int(&raw).ok_or(CommandError::HashNotInteger)?,
        None => 0,
    };
    let next = value.checked_add(delta).ok_or(CommandError::Overflow)?;

    let mut batch = WriteBatch::new();
    if before.is_none() {
        meta::purge_stale(store, &mut batch, KeyType::Hash, &key)?;
    }
    batch.put(field_key, Bytes::from(next.to_string()));
    if created {
        let count = meta::adjust_count(before.unwrap_or(0), 1, 0);
        meta::save_meta(&mut batch, &key, KeyType::Hash, count);
    }
    store.write(batch)?;
    Ok(Reply::integer(next))
}

/// HGETALL key
fn hgetall(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let mut out = Vec::new();
    for (field, value) in fields(ctx.store(), ctx.arg(0))? {
        out.push(Reply::bulk(field));
        out.push(Reply::bulk(value));
    }
    Ok(Reply::array(out))
}

/// HMGET key field [field ...]
fn hmget(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let key = ctx.arg(0);
    let store = ctx.store();
    let exists = meta::get_meta(store, key, KeyType::Hash)?.is_some();

    let mut out = Vec::with_capacity(ctx.args.len() - 1);
    for field in &ctx.args[1..] {
        let value = if exists {
            store.get(&encoding::field_key(key, field))?
        } else {
            None
        };
        out.push(Reply::optional(value));
    }
    Ok(Reply::array(out))
}

/// HKEYS key
fn hkeys(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let fields = fields(ctx.store(), ctx.arg(0))?;
    Ok(Reply::bulks(fields.into_iter().map(|(f, _)| f)))
}

/// HVALS key
fn hvals(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let fields = fields(ctx.store(), ctx.arg(0))?;
    Ok(Reply::bulks(fields.into_iter().map(|(_, v)| v)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_util::{bulk, bulks, create_client};

    #[test]
    fn test_hset_hget() {
        let mut client = create_client();

        assert_eq!(client.exec(&["HSET", "h", "f1", "v1"]), Reply::integer(1));
        assert_eq!(client.exec(&["HGET", "h", "f1"]), bulk("v1"));
        assert_eq!(client.exec(&["HGET", "h", "nope"]), Reply::null());
        assert_eq!(client.exec(&["HGET", "missing", "f1"]), Reply::null());
    }

    #[test]
    fn test_hset_counts_only_new_fields() {
        let mut client = create_client();

        assert_eq!(
            client.exec(&["HSET", "h", "a", "1", "b", "2", "a", "3"]),
            Reply::integer(2)
        );
        assert_eq!(client.exec(&["HSET", "h", "a", "4", "c", "5"]), Reply::integer(1));
        assert_eq!(client.exec(&["HLEN", "h"]), Reply::integer(3));
        assert_eq!(client.exec(&["HGET", "h", "a"]), bulk("4"));
        assert_eq!(
            client.exec(&["HSET", "h", "a"]),
            Reply::error("ERR wrong number of arguments for 'hset' command")
        );
        assert_eq!(
            client.exec(&["HSET", "h", "a", "1", "b"]),
            Reply::error("ERR wrong number of arguments for 'hset' command")
        );
    }

    #[test]
    fn test_hsetnx() {
        let mut client = create_client();

        assert_eq!(client.exec(&["HSETNX", "h", "f", "1"]), Reply::integer(1));
        assert_eq!(client.exec(&["HSETNX", "h", "f", "2"]), Reply::integer(0));
        assert_eq!(client.exec(&["HGET", "h", "f"]), bulk("1"));
        assert_eq!(client.exec(&["HLEN", "h"]), Reply::integer(1));
    }

    #[test]
    fn test_hdel_round_trip() {
        let mut client = create_client();

        client.exec(&["HSET", "h", "f", "v"]);
        assert_eq!(client.exec(&["HDEL", "h", "f", "f", "g"]), Reply::integer(1));
        assert_eq!(client.exec(&["HGET", "h", "f"]), Reply::null());
        assert_eq!(client.exec(&["HLEN", "h"]), Reply::integer(0));
        assert_eq!(client.store().get(b"h").unwrap(), None);
        assert_eq!(client.store().len().unwrap(), 0);
    }

    #[test]
    fn test_hexists_hstrlen() {
        let mut client = create_client();

        client.exec(&["HSET", "h", "f", "hello"]);
        assert_eq!(client.exec(&["HEXISTS", "h", "f"]), Reply::integer(1));
        assert_eq!(client.exec(&["HEXISTS", "h", "g"]), Reply::integer(0));
        assert_eq!(client.exec(&["HSTRLEN", "h", "f"]), Reply::integer(5));
        assert_eq!(client.exec(&["HSTRLEN", "h", "g"]), Reply::integer(0));
    }

    #[test]
    fn test_hincrby() {
        let mut client = create_client();

        assert_eq!(client.exec(&["HINCRBY", "h", "n", "5"]), Reply::integer(5));
        assert_eq!(client.exec(&["HINCRBY", "h", "n", "-2"]), Reply::integer(3));
        assert_eq!(client.exec(&["HLEN", "h"]), Reply::integer(1));

        client.exec(&["HSET", "h", "s", "abc"]);
        assert_eq!(
            client.exec(&["HINCRBY", "h", "s", "1"]),
            Reply::error("ERR hash value is not an integer")
        );
        assert_eq!(
            client.exec(&["HINCRBY", "h", "n", "x"]),
            Reply::error("ERR value is not an integer or out of range")
        );
        assert_eq!(client.exec(&["HLEN", "h"]), Reply::integer(2));
    }

    #[test]
    fn test_hgetall_hkeys_hvals() {
        let mut client = create_client();

        client.exec(&["HMSET", "h", "b", "2", "a", "1"]);
        assert_eq!(client.exec(&["HGETALL", "h"]), bulks(&["a", "1", "b", "2"]));
        assert_eq!(client.exec(&["HKEYS", "h"]), bulks(&["a", "b"]));
        assert_eq!(client.exec(&["HVALS", "h"]), bulks(&["1", "2"]));
        assert_eq!(client.exec(&["HGETALL", "missing"]), Reply::array(vec![]));
    }

    #[test]
    fn test_hmset_hmget() {
        let mut client = create_client();

        assert_eq!(client.exec(&["HMSET", "h", "a", "1", "b", "2"]), Reply::ok());
        assert_eq!(
            client.exec(&["HMGET", "h", "a", "x", "b"]),
            Reply::array(vec![bulk("1"), Reply::null(), bulk("2")])
        );
        assert_eq!(client.exec(&["HMSET", "h", "a", "9"]), Reply::ok());
        assert_eq!(client.exec(&["HLEN", "h"]), Reply::integer(2));
    }

    #[test]
    fn test_hash_on_set_is_wrongtype() {
        let mut client = create_client();

        client.exec(&["SADD", "k", "a"]);
        assert_eq!(
            client.exec(&["HSET", "k", "f", "v"]),
            Reply::error("WRONGTYPE Operation against a key holding the wrong kind of value")
        );
        assert!(client.exec(&["HGET", "k", "f"]).is_error());
        assert_eq!(client.exec(&["SMEMBERS", "k"]), bulks(&["a"]));
    }
}
