//! # RaptorKV - Redis-Style Data Structures over an Ordered KV Engine
//!
//! RaptorKV runs Redis-style commands (strings, sets, hashes, sorted sets,
//! key-space and expire commands) on top of a flat, ordered byte-key /
//! byte-value store. Every composite value is spread over many flat records
//! that share a key prefix, so listing a collection is a prefix scan and
//! membership is a point lookup.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               RaptorKV                                  │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────────┐    ┌──────────────────────┐     │
//! │  │  Console    │───>│ CommandHandler  │───>│ string/set/hash/zset │     │
//! │  │  (main.rs)  │    │ auth+table+arity│    │ keys/server handlers │     │
//! │  └─────────────┘    └─────────────────┘    └──────────┬───────────┘     │
//! │                                                       │                 │
//! │                              encoding + meta ◄────────┤                 │
//! │                                                       ▼                 │
//! │                     ┌──────────────────────────────────────────────┐    │
//! │                     │          dyn Storage (StorageEngine)         │    │
//! │                     │    RwLock<BTreeMap<Bytes, Entry>> + TTLs     │    │
//! │                     └──────────────────────────────────────────────┘    │
//! │                          ▲                              ▲               │
//! │               ┌──────────┴─────────┐         ┌──────────┴──────────┐    │
//! │               │   ExpirySweeper    │         │  snapshot (bincode) │    │
//! │               └────────────────────┘         └─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Layout
//!
//! ```text
//!   {key}                              's' {payload}        string
//!   {key}                              'S'|'H'|'Z' {count}  collection meta
//!   'S' {len} {key} {member}           "1"                  set member
//!   'H' {len} {key} {field}            {value}              hash field
//!   'Z' {len} {key} {member}           {score text}         zset member
//!   'z' {len} {key} {score} {member}   ""                   zset score index
//! ```
//!
//! `{len}` is the key length as a big-endian `u32`, so one key's prefix can
//! never be a prefix of another key's records.
//!
//! ## Quick Start
//!
//! ```
//! use raptorkv::{CommandHandler, Reply, StorageEngine};
//! use bytes::Bytes;
//! use std::sync::Arc;
//!
//! let handler = CommandHandler::new(Arc::new(StorageEngine::new()));
//! let mut session = handler.session();
//!
//! let cmd = |parts: &[&str]| -> Vec<Bytes> {
//!     parts.iter().map(|p| Bytes::from(p.to_string())).collect()
//! };
//!
//! assert_eq!(handler.execute(&mut session, &cmd(&["SADD", "s", "a", "b"])), Reply::integer(2));
//! assert_eq!(handler.execute(&mut session, &cmd(&["SCARD", "s"])), Reply::integer(2));
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: the `Storage` contract and the bundled ordered engine
//! - [`encoding`]: key and value layouts
//! - [`meta`]: collection counts and type checks
//! - [`commands`]: dispatch table and the command handlers
//! - [`reply`]: the reply value handed back to callers
//! - [`config`]: command-line / environment configuration

pub mod commands;
pub mod config;
pub mod encoding;
pub mod error;
pub mod meta;
pub mod reply;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::{CommandHandler, Session};
pub use config::Config;
pub use error::{CommandError, CommandResult};
pub use reply::Reply;
pub use storage::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper, Storage, StorageEngine};

/// Version of RaptorKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
