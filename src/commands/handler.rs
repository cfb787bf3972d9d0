//! Command Handler
//!
//! [`CommandHandler::execute`] is the single entry point of the command
//! layer. For every command it:
//!
//! 1. checks the caller's [`Session`] is authenticated (unless it is `AUTH`)
//! 2. looks the name up in the [`CommandTable`]
//! 3. validates the argument count against the command's arity
//! 4. runs the handler with a [`Context`] and turns any [`CommandError`] into
//!    an error reply
//!
//! ```text
//!   ["SADD", "s", "a"] ──► auth ──► table["sadd"] ──► arity ──► set::sadd(ctx)
//!                                                                  │
//!                                   Reply::Integer(1) ◄────────────┘
//! ```
//!
//! Handlers never see the command name or touch the session except through
//! the `Context`, so no state is shared between callers other than the
//! database itself.

use super::locks::KeyGuards;
use super::{CommandTable, KeyLocks};
use crate::encoding;
use crate::error::{CommandError, CommandResult};
use crate::reply::Reply;
use crate::storage::Storage;
use bytes::Bytes;
use parking_lot::MutexGuard;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

/// The shared database: a storage engine plus the per-key locks that
/// serialize multi-step handlers.
#[derive(Debug)]
pub struct Db {
    pub store: Arc<dyn Storage>,
    pub locks: KeyLocks,
}

impl Db {
    pub fn new(store: Arc<dyn Storage>) -> Self {
        Self {
            store,
            locks: KeyLocks::new(),
        }
    }
}

/// Per-caller state, owned by whoever drives the handler (one per console
/// or connection).
#[derive(Debug, Default)]
pub struct Session {
    authenticated: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub(crate) fn set_authenticated(&mut self, authenticated: bool) {
        self.authenticated = authenticated;
    }
}

/// Server-wide settings and counters.
#[derive(Debug)]
pub struct ServerInfo {
    password: Option<String>,
    start_time: Instant,
    commands_processed: AtomicU64,
}

impl ServerInfo {
    fn new(password: Option<String>) -> Self {
        Self {
            password,
            start_time: Instant::now(),
            commands_processed: AtomicU64::new(0),
        }
    }

    pub fn requires_auth(&self) -> bool {
        self.password.is_some()
    }

    pub fn check_password(&self, candidate: &[u8]) -> bool {
        self.password
            .as_deref()
            .map(|p| p.as_bytes() == candidate)
            .unwrap_or(false)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn commands_processed(&self) -> u64 {
        self.commands_processed.load(Ordering::Relaxed)
    }
}

/// Everything a handler needs for one command.
pub struct Context<'a> {
    /// Arguments after the command name.
    pub args: &'a [Bytes],
    pub session: &'a mut Session,
    pub db: &'a Db,
    pub server: &'a ServerInfo,
    pub table: &'a CommandTable,
    /// Lower-case command name, for error messages.
    pub name: &'static str,
}

impl<'a> Context<'a> {
    pub fn store(&self) -> &'a dyn Storage {
        let db: &'a Db = self.db;
        db.store.as_ref()
    }

    pub fn arg(&self, index: usize) -> &'a Bytes {
        let args: &'a [Bytes] = self.args;
        &args[index]
    }

    /// Argument as an owned key.
    pub fn key(&self, index: usize) -> Bytes {
        self.args[index].clone()
    }

    pub fn int_arg(&self, index: usize) -> CommandResult<i64> {
        encoding::parse_int(&self.args[index]).ok_or(CommandError::NotInteger)
    }

    pub fn float_arg(&self, index: usize) -> CommandResult<f64> {
        encoding::parse_float(&self.args[index]).ok_or(CommandError::NotFloat)
    }

    /// Argument upper-cased, for option keywords.
    pub fn option(&self, index: usize) -> String {
        String::from_utf8_lossy(&self.args[index]).to_ascii_uppercase()
    }

    pub fn wrong_arity(&self) -> CommandError {
        CommandError::WrongArity(self.name.to_string())
    }

    /// Serializes against other handlers touching `key`.
    pub fn lock(&self, key: &[u8]) -> MutexGuard<'a, ()> {
        let db: &'a Db = self.db;
        db.locks.lock(key)
    }

    pub fn lock_many<K: AsRef<[u8]>>(&self, keys: &[K]) -> KeyGuards<'a> {
        let db: &'a Db = self.db;
        db.locks.lock_many(keys)
    }
}

/// Executes commands against a shared database.
///
/// Cloning is cheap; every clone shares the same database, table and
/// counters.
#[derive(Clone, Debug)]
pub struct CommandHandler {
    db: Arc<Db>,
    table: Arc<CommandTable>,
    server: Arc<ServerInfo>,
}

impl CommandHandler {
    /// Creates a handler with no password.
    pub fn new(store: Arc<dyn Storage>) -> Self {
        Self::with_password(store, None)
    }

    /// Creates a handler that requires `AUTH` when `password` is set.
    pub fn with_password(store: Arc<dyn Storage>, password: Option<String>) -> Self {
        Self {
            db: Arc::new(Db::new(store)),
            table: Arc::new(CommandTable::new()),
            server: Arc::new(ServerInfo::new(password)),
        }
    }

    pub fn store(&self) -> &Arc<dyn Storage> {
        &self.db.store
    }

    pub fn table(&self) -> &CommandTable {
        &self.table
    }

    /// Opens a session for a new caller. Without a password it starts
    /// authenticated.
    pub fn session(&self) -> Session {
        Session {
            authenticated: !self.server.requires_auth(),
        }
    }

    /// Executes one command. `args[0]` is the command name.
    pub fn execute(&self, session: &mut Session, args: &[Bytes]) -> Reply {
        let Some((name, rest)) = args.split_first() else {
            return Reply::error("ERR empty command");
        };
        let name = String::from_utf8_lossy(name).to_ascii_lowercase();
        self.server.commands_processed.fetch_add(1, Ordering::Relaxed);

        if !session.is_authenticated() && name != "auth" {
            return CommandError::NoAuth.into();
        }

        let Some(command) = self.table.get(&name) else {
            return CommandError::UnknownCommand(name).into();
        };

        if !command.accepts(args.len()) {
            return CommandError::WrongArity(command.name.to_string()).into();
        }

        debug!(command = command.name, argc = rest.len(), "Executing command");

        let mut ctx = Context {
            args: rest,
            session,
            db: &self.db,
            server: &self.server,
            table: &self.table,
            name: command.name,
        };

        match (command.handler)(&mut ctx) {
            Ok(reply) => reply,
            Err(err) => {
                if matches!(err, CommandError::Storage(_) | CommandError::Corrupted(_)) {
                    error!(command = command.name, error = %err, "Command failed");
                }
                err.into()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_util::{create_client, make_command};
    use crate::storage::StorageEngine;

    #[test]
    fn test_unknown_command() {
        let mut client = create_client();
        assert_eq!(
            client.exec(&["NOPE", "x"]),
            Reply::error("ERR unknown command 'nope'")
        );
    }

    #[test]
    fn test_names_are_case_insensitive() {
        let mut client = create_client();
        assert_eq!(client.exec(&["pInG"]), Reply::pong());
    }

    #[test]
    fn test_wrong_arity_before_storage() {
        let mut client = create_client();
        assert_eq!(
            client.exec(&["GET"]),
            Reply::error("ERR wrong number of arguments for 'get' command")
        );
        assert_eq!(
            client.exec(&["SADD", "s"]),
            Reply::error("ERR wrong number of arguments for 'sadd' command")
        );
    }

    #[test]
    fn test_empty_command() {
        let handler = CommandHandler::new(Arc::new(StorageEngine::new()));
        let mut session = handler.session();
        assert!(handler.execute(&mut session, &[]).is_error());
    }

    #[test]
    fn test_sessions_are_independent() {
        let handler =
            CommandHandler::with_password(Arc::new(StorageEngine::new()), Some("pw".into()));
        let mut alice = handler.session();
        let mut bob = handler.session();

        assert_eq!(
            handler.execute(&mut alice, &make_command(&["AUTH", "pw"])),
            Reply::ok()
        );
        assert_eq!(
            handler.execute(&mut alice, &make_command(&["SET", "k", "v"])),
            Reply::ok()
        );
        assert_eq!(
            handler.execute(&mut bob, &make_command(&["GET", "k"])),
            Reply::error("NOAUTH Authentication required")
        );
    }

    #[test]
    fn test_commands_processed_counter() {
        let mut client = create_client();
        client.exec(&["PING"]);
        client.exec(&["PING"]);
        assert_eq!(client.handler.server.commands_processed(), 2);
    }
}
