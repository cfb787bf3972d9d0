//! Command Layer
//!
//! Receives a parsed command (name + byte-string arguments), runs it against
//! the database and returns a [`Reply`](crate::Reply).
//!
//! ## Architecture
//!
//! ```text
//! ["HSET", "h", "f", "v"]
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  auth, lookup, arity
//! └────────┬────────┘
//!          │ Context { args, session, db }
//!          ▼
//! ┌─────────────────┐
//! │  hash::hset     │  KeyLocks + meta + encoding
//! └────────┬────────┘
//!          │ get / scan / WriteBatch
//!          ▼
//! ┌─────────────────┐
//! │ dyn Storage     │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! ### String Commands
//! - `SET`, `SETNX`, `SETEX`, `PSETEX`, `GET`, `GETSET`, `GETRANGE`
//! - `APPEND`, `STRLEN`
//! - `INCR`, `INCRBY`, `DECR`, `DECRBY`, `INCRBYFLOAT`
//! - `MSET`, `MSETNX`, `MGET`
//!
//! ### Set Commands
//! - `SADD`, `SREM`, `SISMEMBER`, `SCARD`, `SMEMBERS`
//! - `SPOP`, `SRANDMEMBER`
//! - `SUNION`, `SUNIONSTORE`, `SDIFF`, `SDIFFSTORE`
//!
//! ### Hash Commands
//! - `HSET`, `HSETNX`, `HMSET`, `HGET`, `HMGET`, `HEXISTS`, `HDEL`
//! - `HLEN`, `HSTRLEN`, `HINCRBY`, `HGETALL`, `HKEYS`, `HVALS`
//!
//! ### Sorted Set Commands
//! - `ZADD`, `ZSCORE`, `ZINCRBY`, `ZCARD`, `ZREM`
//!
//! ### Key Commands
//! - `DEL`, `EXISTS`, `TYPE`, `RENAME`, `RENAMENX`, `FLUSHDB`, `FLUSHALL`
//! - `EXPIRE`, `PEXPIRE`, `EXPIREAT`, `TTL`, `PTTL`, `PERSIST`
//!
//! ### Server Commands
//! - `PING`, `ECHO`, `AUTH`, `SAVE`, `BGSAVE`, `INFO`, `COMMAND`

pub mod handler;
pub mod hash;
pub mod keys;
pub mod locks;
pub mod server;
pub mod set;
pub mod string;
pub mod table;
pub mod zset;

pub use handler::{CommandHandler, Context, Db, ServerInfo, Session};
pub use locks::KeyLocks;
pub use table::{Command, CommandTable, HandlerFn};

#[cfg(test)]
pub(crate) mod test_util {
    use super::{CommandHandler, Session};
    use crate::reply::Reply;
    use crate::storage::{Storage, StorageEngine};
    use bytes::Bytes;
    use std::sync::Arc;

    /// A handler over a fresh engine plus one session.
    pub struct TestClient {
        pub handler: CommandHandler,
        pub session: Session,
        pub engine: Arc<StorageEngine>,
    }

    impl TestClient {
        pub fn exec(&mut self, args: &[&str]) -> Reply {
            self.handler.execute(&mut self.session, &make_command(args))
        }

        pub fn store(&self) -> &dyn Storage {
            self.engine.as_ref()
        }
    }

    pub fn create_client() -> TestClient {
        let engine = Arc::new(StorageEngine::new());
        let handler = CommandHandler::new(engine.clone());
        let session = handler.session();
        TestClient {
            handler,
            session,
            engine,
        }
    }

    pub fn make_command(args: &[&str]) -> Vec<Bytes> {
        args.iter().map(|s| Bytes::from(s.to_string())).collect()
    }

    pub fn bulk(s: &str) -> Reply {
        Reply::bulk(Bytes::from(s.to_string()))
    }

    pub fn bulks(items: &[&str]) -> Reply {
        Reply::array(items.iter().map(|s| bulk(s)).collect())
    }

    /// Sorts an array reply of bulk strings, for commands without a defined
    /// order.
    pub fn sorted(reply: Reply) -> Reply {
        match reply {
            Reply::Array(mut items) => {
                items.sort_by(|a, b| a.as_bytes().cmp(&b.as_bytes()));
                Reply::Array(items)
            }
            other => other,
        }
    }
}
