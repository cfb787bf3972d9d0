//! String Commands
//!
//! A string lives in a single root record `['s'][payload]` at the raw user
//! key. Writing a string over a collection removes every record the
//! collection owned, in the same batch.

use super::{CommandTable, Context};
use crate::encoding::{self, RootValue};
use crate::error::{CommandError, CommandResult};
use crate::meta;
use crate::reply::Reply;
use crate::storage::{TtlPolicy, WriteBatch};
use bytes::{Bytes, BytesMut};
use std::collections::HashSet;
use std::time::Duration;

pub(crate) fn register(table: &mut CommandTable) {
    table.add("set", -3, set);
    table.add("setnx", 3, setnx);
    table.add("setex", 4, setex);
    table.add("psetex", 4, psetex);
    table.add("get", 2, get);
    table.add("getset", 3, getset);
    table.add("getrange", 4, getrange);
    table.add("append", 3, append);
    table.add("strlen", 2, strlen);
    table.add("incr", 2, incr);
    table.add("incrby", 3, incrby);
    table.add("decr", 2, decr);
    table.add("decrby", 3, decrby);
    table.add("incrbyfloat", 3, incrbyfloat);
    table.add("mset", -3, mset);
    table.add("msetnx", -3, msetnx);
    table.add("mget", -2, mget);
}

// ========================================================================
// Helpers
// ========================================================================

/// Stages `key = payload`, replacing whatever type the key held.
fn stage_overwrite(
    ctx: &Context<'_>,
    batch: &mut WriteBatch,
    key: &Bytes,
    payload: &[u8],
    ttl: TtlPolicy,
) -> CommandResult<()> {
    meta::delete_key(ctx.store(), batch, key)?;
    batch.put_with_ttl(key.clone(), encoding::encode_string(payload), ttl);
    Ok(())
}

fn expire_arg(ctx: &Context<'_>, index: usize, unit_ms: bool) -> CommandResult<Duration> {
    let amount = ctx.int_arg(index)?;
    if amount <= 0 {
        return Err(CommandError::InvalidExpireTime(ctx.name.to_string()));
    }
    Ok(if unit_ms {
        Duration::from_millis(amount as u64)
    } else {
        Duration::from_secs(amount as u64)
    })
}

fn parse_stored_int(payload: &[u8]) -> CommandResult<i64> {
    encoding::parse_int(payload).ok_or(CommandError::NotInteger)
}

/// Adds `delta` to the integer at `key`, creating it at 0.
fn incr_by(ctx: &Context<'_>, delta: i64) -> CommandResult<Reply> {
    let key = ctx.key(0);
    let _guard = ctx.lock(&key);

    let current = match meta::get_string(ctx.store(), &key)? {
        Some(payload) => parse_stored_int(&payload)?,
        None => 0,
    };
    let next = current.checked_add(delta).ok_or(CommandError::Overflow)?;

    let mut batch = WriteBatch::new();
    batch.put(key, encoding::encode_string(next.to_string().as_bytes()));
    ctx.store().write(batch)?;
    Ok(Reply::integer(next))
}

// ========================================================================
// Commands
// ========================================================================

/// SET key value [EX seconds | PX milliseconds] [NX | XX]
fn set(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let key = ctx.key(0);
    let value = ctx.arg(1);

    let mut ttl = TtlPolicy::Clear;
    let mut nx = false;
    let mut xx = false;

    let mut i = 2;
    while i < ctx.args.len() {
        match ctx.option(i).as_str() {
            "EX" | "PX" if i + 1 < ctx.args.len() => {
                let unit_ms = ctx.option(i) == "PX";
                ttl = TtlPolicy::Expire(expire_arg(ctx, i + 1, unit_ms)?);
                i += 1;
            }
            "NX" => nx = true,
            "XX" => xx = true,
            _ => return Err(CommandError::Syntax),
        }
        i += 1;
    }
    if nx && xx {
        return Err(CommandError::Syntax);
    }

    let _guard = ctx.lock(&key);
    let exists = ctx.store().exists(&key)?;
    if (nx && exists) || (xx && !exists) {
        return Ok(Reply::null());
    }

    let mut batch = WriteBatch::new();
    stage_overwrite(ctx, &mut batch, &key, value, ttl)?;
    ctx.store().write(batch)?;
    Ok(Reply::ok())
}

/// SETNX key value
fn setnx(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let key = ctx.key(0);
    let _guard = ctx.lock(&key);

    if ctx.store().exists(&key)? {
        return Ok(Reply::integer(0));
    }
    let mut batch = WriteBatch::new();
    batch.put_with_ttl(key, encoding::encode_string(ctx.arg(1)), TtlPolicy::Clear);
    ctx.store().write(batch)?;
    Ok(Reply::integer(1))
}

/// SETEX key seconds value
fn setex(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    set_with_expiry(ctx, false)
}

/// PSETEX key milliseconds value
fn psetex(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    set_with_expiry(ctx, true)
}

fn set_with_expiry(ctx: &mut Context<'_>, unit_ms: bool) -> CommandResult<Reply> {
    let key = ctx.key(0);
    let ttl = expire_arg(ctx, 1, unit_ms)?;
    let _guard = ctx.lock(&key);

    let mut batch = WriteBatch::new();
    stage_overwrite(ctx, &mut batch, &key, ctx.arg(2), TtlPolicy::Expire(ttl))?;
    ctx.store().write(batch)?;
    Ok(Reply::ok())
}

/// GET key
fn get(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    Ok(Reply::optional(meta::get_string(ctx.store(), ctx.arg(0))?))
}

/// GETSET key value
fn getset(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let key = ctx.key(0);
    let _guard = ctx.lock(&key);

    let previous = meta::get_string(ctx.store(), &key)?;
    let mut batch = WriteBatch::new();
    batch.put_with_ttl(key, encoding::encode_string(ctx.arg(1)), TtlPolicy::Clear);
    ctx.store().write(batch)?;
    Ok(Reply::optional(previous))
}

/// GETRANGE key start end
fn getrange(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let mut start = ctx.int_arg(1)?;
    let mut end = ctx.int_arg(2)?;
    let payload = meta::get_string(ctx.store(), ctx.arg(0))?.unwrap_or_default();

    let len = payload.len() as i64;
    if start < 0 {
        start += len;
    }
    if end < 0 {
        end += len;
    }
    let start = start.max(0);
    let end = end.max(0).min(len - 1);
    if len == 0 || start > end {
        return Ok(Reply::bulk(Bytes::new()));
    }
    Ok(Reply::bulk(payload.slice(start as usize..=end as usize)))
}

/// APPEND key value
fn append(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let key = ctx.key(0);
    let suffix = ctx.arg(1);
    let _guard = ctx.lock(&key);

    let current = meta::get_string(ctx.store(), &key)?.unwrap_or_default();
    let mut joined = BytesMut::with_capacity(current.len() + suffix.len());
    joined.extend_from_slice(&current);
    joined.extend_from_slice(suffix);

    let mut batch = WriteBatch::new();
    batch.put(key, encoding::encode_string(&joined));
    ctx.store().write(batch)?;
    Ok(Reply::integer(joined.len() as i64))
}

/// STRLEN key
fn strlen(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let len = meta::get_string(ctx.store(), ctx.arg(0))?
        .map(|p| p.len())
        .unwrap_or(0);
    Ok(Reply::integer(len as i64))
}

/// INCR key
fn incr(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    incr_by(ctx, 1)
}

/// INCRBY key increment
fn incrby(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let delta = ctx.int_arg(1)?;
    incr_by(ctx, delta)
}

/// DECR key
fn decr(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    incr_by(ctx, -1)
}

/// DECRBY key decrement
fn decrby(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let delta = ctx.int_arg(1)?.checked_neg().ok_or(CommandError::Overflow)?;
    incr_by(ctx, delta)
}

/// INCRBYFLOAT key increment
fn incrbyfloat(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let key = ctx.key(0);
    let delta = ctx.float_arg(1)?;
    let _guard = ctx.lock(&key);

    let current = match meta::get_string(ctx.store(), &key)? {
        Some(payload) => encoding::parse_float(&payload).ok_or(CommandError::NotFloat)?,
        None => 0.0,
    };
    let next = current + delta;
    if !next.is_finite() {
        return Err(CommandError::NanOrInfinity);
    }

    let text = encoding::format_float(next);
    let mut batch = WriteBatch::new();
    batch.put(key, encoding::encode_string(text.as_bytes()));
    ctx.store().write(batch)?;
    Ok(Reply::bulk(Bytes::from(text)))
}

fn pairs(ctx: &Context<'_>) -> CommandResult<Vec<(Bytes, Bytes)>> {
    if ctx.args.len() % 2 != 0 {
        return Err(ctx.wrong_arity());
    }
    Ok(ctx
        .args
        .chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect())
}

/// MSET key value [key value ...]
fn mset(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let pairs = pairs(ctx)?;
    let keys: Vec<&Bytes> = pairs.iter().map(|(k, _)| k).collect();
    let _guards = ctx.lock_many(&keys);

    let mut batch = WriteBatch::new();
    for (key, value) in &pairs {
        stage_overwrite(ctx, &mut batch, key, value, TtlPolicy::Clear)?;
    }
    ctx.store().write(batch)?;
    Ok(Reply::ok())
}

/// MSETNX key value [key value ...]
fn msetnx(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let pairs = pairs(ctx)?;
    let keys: Vec<&Bytes> = pairs.iter().map(|(k, _)| k).collect();
    let _guards = ctx.lock_many(&keys);

    // The engine checks "none exist" against its own state, so a key repeated
    // in the arguments is staged once with its last value.
    let mut seen = HashSet::new();
    let mut batch = WriteBatch::new();
    for (key, value) in pairs.iter().rev() {
        if seen.insert(key) {
            batch.put_with_ttl(key.clone(), encoding::encode_string(value), TtlPolicy::Clear);
        }
    }
    let written = ctx.store().write_if_none_exist(batch)?;
    Ok(Reply::boolean(written))
}

/// MGET key [key ...]
fn mget(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let store = ctx.store();
    let mut values = Vec::with_capacity(ctx.args.len());
    for key in ctx.args {
        let value = store
            .get(key)?
            .and_then(|raw| match encoding::decode_root(&raw) {
                Some(RootValue::String(payload)) => Some(payload),
                _ => None,
            });
        values.push(Reply::optional(value));
    }
    Ok(Reply::array(values))
}

#[cfg(test)]
mod tests {
    use crate::commands::test_util::{bulk, create_client};
    use crate::reply::Reply;
    use crate::storage::{Storage, TtlState};

    #[test]
    fn test_set_get() {
        let mut client = create_client();

        assert_eq!(client.exec(&["SET", "key", "value"]), Reply::ok());
        assert_eq!(client.exec(&["GET", "key"]), bulk("value"));
        assert_eq!(client.exec(&["GET", "nonexistent"]), Reply::null());
    }

    #[test]
    fn test_string_record_is_tagged() {
        let mut client = create_client();
        client.exec(&["SET", "key", "value"]);
        assert_eq!(
            client.store().get(b"key").unwrap().unwrap().as_ref(),
            b"svalue"
        );
    }

    #[test]
    fn test_set_with_options() {
        let mut client = create_client();

        assert_eq!(client.exec(&["SET", "key", "value", "NX"]), Reply::ok());
        assert_eq!(client.exec(&["SET", "key", "newvalue", "NX"]), Reply::null());
        assert_eq!(client.exec(&["SET", "key", "newvalue", "XX"]), Reply::ok());
        assert_eq!(client.exec(&["SET", "other", "v", "XX"]), Reply::null());
        assert_eq!(client.exec(&["GET", "key"]), bulk("newvalue"));
    }

    #[test]
    fn test_set_option_errors() {
        let mut client = create_client();

        assert_eq!(
            client.exec(&["SET", "k", "v", "NX", "XX"]),
            Reply::error("ERR syntax error")
        );
        assert_eq!(client.exec(&["SET", "k", "v", "EX"]), Reply::error("ERR syntax error"));
        assert_eq!(
            client.exec(&["SET", "k", "v", "EX", "0"]),
            Reply::error("ERR invalid expire time in 'set' command")
        );
        assert_eq!(
            client.exec(&["SET", "k", "v", "PX", "ten"]),
            Reply::error("ERR value is not an integer or out of range")
        );
    }

    #[test]
    fn test_set_ex_attaches_ttl_and_plain_set_clears_it() {
        let mut client = create_client();

        client.exec(&["SET", "k", "v", "EX", "100"]);
        let secs = client.store().ttl(b"k").unwrap().as_secs();
        assert!(secs > 95 && secs <= 100);

        client.exec(&["SET", "k", "v2"]);
        assert_eq!(client.store().ttl(b"k").unwrap(), TtlState::Persistent);
    }

    #[test]
    fn test_set_replaces_collection() {
        let mut client = create_client();

        client.exec(&["SADD", "k", "a", "b"]);
        assert_eq!(client.exec(&["SET", "k", "v"]), Reply::ok());
        assert_eq!(client.exec(&["TYPE", "k"]), Reply::status("string"));
        // only the string root remains
        assert_eq!(client.store().len().unwrap(), 1);
    }

    #[test]
    fn test_setnx() {
        let mut client = create_client();

        assert_eq!(client.exec(&["SETNX", "k", "1"]), Reply::integer(1));
        assert_eq!(client.exec(&["SETNX", "k", "2"]), Reply::integer(0));
        assert_eq!(client.exec(&["GET", "k"]), bulk("1"));
    }

    #[test]
    fn test_setex_psetex() {
        let mut client = create_client();

        assert_eq!(client.exec(&["SETEX", "k", "10", "v"]), Reply::ok());
        let secs = client.store().ttl(b"k").unwrap().as_secs();
        assert!(secs > 0 && secs <= 10);

        assert_eq!(client.exec(&["PSETEX", "p", "5000", "v"]), Reply::ok());
        let ms = client.store().ttl(b"p").unwrap().as_millis();
        assert!(ms > 0 && ms <= 5000);

        assert_eq!(
            client.exec(&["SETEX", "k", "-1", "v"]),
            Reply::error("ERR invalid expire time in 'setex' command")
        );
        assert_eq!(
            client.exec(&["PSETEX", "k", "0", "v"]),
            Reply::error("ERR invalid expire time in 'psetex' command")
        );
    }

    #[test]
    fn test_get_on_collection_is_wrongtype() {
        let mut client = create_client();

        client.exec(&["HSET", "h", "f", "v"]);
        assert_eq!(
            client.exec(&["GET", "h"]),
            Reply::error("WRONGTYPE Operation against a key holding the wrong kind of value")
        );
    }

    #[test]
    fn test_getset() {
        let mut client = create_client();

        assert_eq!(client.exec(&["GETSET", "k", "a"]), Reply::null());
        assert_eq!(client.exec(&["GETSET", "k", "b"]), bulk("a"));
        assert_eq!(client.exec(&["GET", "k"]), bulk("b"));
    }

    #[test]
    fn test_getrange() {
        let mut client = create_client();

        client.exec(&["SET", "k", "This is a string"]);
        assert_eq!(client.exec(&["GETRANGE", "k", "0", "3"]), bulk("This"));
        assert_eq!(client.exec(&["GETRANGE", "k", "-3", "-1"]), bulk("ing"));
        assert_eq!(client.exec(&["GETRANGE", "k", "0", "-1"]), bulk("This is a string"));
        assert_eq!(client.exec(&["GETRANGE", "k", "10", "100"]), bulk("string"));
        assert_eq!(client.exec(&["GETRANGE", "k", "5", "2"]), bulk(""));
        assert_eq!(client.exec(&["GETRANGE", "missing", "0", "-1"]), bulk(""));
    }

    #[test]
    fn test_append_strlen() {
        let mut client = create_client();

        assert_eq!(client.exec(&["APPEND", "key", "Hello"]), Reply::integer(5));
        assert_eq!(client.exec(&["APPEND", "key", " World"]), Reply::integer(11));
        assert_eq!(client.exec(&["GET", "key"]), bulk("Hello World"));
        assert_eq!(client.exec(&["STRLEN", "key"]), Reply::integer(11));
        assert_eq!(client.exec(&["STRLEN", "missing"]), Reply::integer(0));
    }

    #[test]
    fn test_append_keeps_ttl() {
        let mut client = create_client();

        client.exec(&["SETEX", "k", "100", "a"]);
        client.exec(&["APPEND", "k", "b"]);
        assert!(client.store().ttl(b"k").unwrap().remaining().is_some());
    }

    #[test]
    fn test_incr_decr() {
        let mut client = create_client();

        assert_eq!(client.exec(&["INCR", "counter"]), Reply::integer(1));
        assert_eq!(client.exec(&["INCR", "counter"]), Reply::integer(2));
        assert_eq!(client.exec(&["DECR", "counter"]), Reply::integer(1));
        assert_eq!(client.exec(&["INCRBY", "counter", "10"]), Reply::integer(11));
        assert_eq!(client.exec(&["DECRBY", "counter", "20"]), Reply::integer(-9));
        assert_eq!(client.exec(&["GET", "counter"]), bulk("-9"));
    }

    #[test]
    fn test_incr_errors() {
        let mut client = create_client();

        client.exec(&["SET", "text", "abc"]);
        assert_eq!(
            client.exec(&["INCR", "text"]),
            Reply::error("ERR value is not an integer or out of range")
        );
        assert_eq!(
            client.exec(&["INCRBY", "n", "1.5"]),
            Reply::error("ERR value is not an integer or out of range")
        );

        client.exec(&["SET", "big", "9223372036854775807"]);
        assert_eq!(
            client.exec(&["INCR", "big"]),
            Reply::error("ERR increment or decrement would overflow")
        );
        assert_eq!(
            client.exec(&["DECRBY", "n", "-9223372036854775808"]),
            Reply::error("ERR increment or decrement would overflow")
        );
        assert_eq!(client.exec(&["GET", "big"]), bulk("9223372036854775807"));
    }

    #[test]
    fn test_incrbyfloat() {
        let mut client = create_client();

        assert_eq!(client.exec(&["INCRBYFLOAT", "f", "10.5"]), bulk("10.5"));
        assert_eq!(client.exec(&["INCRBYFLOAT", "f", "0.5"]), bulk("11"));
        assert_eq!(client.exec(&["INCRBYFLOAT", "f", "-5"]), bulk("6"));
        assert_eq!(
            client.exec(&["INCRBYFLOAT", "f", "x"]),
            Reply::error("ERR value is not a valid float")
        );
        assert_eq!(
            client.exec(&["INCRBYFLOAT", "f", "inf"]),
            Reply::error("ERR increment would produce NaN or Infinity")
        );

        client.exec(&["SET", "s", "abc"]);
        assert_eq!(
            client.exec(&["INCRBYFLOAT", "s", "1"]),
            Reply::error("ERR value is not a valid float")
        );
    }

    #[test]
    fn test_mset_mget() {
        let mut client = create_client();

        assert_eq!(client.exec(&["MSET", "k1", "v1", "k2", "v2"]), Reply::ok());
        client.exec(&["SADD", "set", "m"]);
        assert_eq!(
            client.exec(&["MGET", "k1", "k2", "k3", "set"]),
            Reply::Array(vec![bulk("v1"), bulk("v2"), Reply::null(), Reply::null()])
        );
        assert_eq!(
            client.exec(&["MSET", "k1", "v1", "k2"]),
            Reply::error("ERR wrong number of arguments for 'mset' command")
        );
    }

    #[test]
    fn test_msetnx_all_or_nothing() {
        let mut client = create_client();

        assert_eq!(client.exec(&["MSETNX", "a", "1", "b", "2"]), Reply::integer(1));
        assert_eq!(client.exec(&["MSETNX", "b", "x", "c", "3"]), Reply::integer(0));
        assert_eq!(client.exec(&["GET", "c"]), Reply::null());
        assert_eq!(client.exec(&["GET", "b"]), bulk("2"));

        // a collection root also counts as existing
        client.exec(&["HSET", "h", "f", "v"]);
        assert_eq!(client.exec(&["MSETNX", "h", "x", "d", "4"]), Reply::integer(0));
        assert_eq!(client.exec(&["GET", "d"]), Reply::null());
    }
}
