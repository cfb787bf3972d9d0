//! Command Dispatch Table
//!
//! An immutable map from lower-case command name to its [`Command`]
//! descriptor, built once when a [`CommandHandler`](super::CommandHandler)
//! is created. Each handler module contributes its entries through a
//! `register` function.

use super::{hash, keys, server, set, string, zset, Context};
use crate::error::CommandResult;
use crate::reply::Reply;
use std::collections::HashMap;

/// Signature shared by every command implementation.
pub type HandlerFn = fn(&mut Context<'_>) -> CommandResult<Reply>;

/// Describes one command.
#[derive(Clone, Copy)]
pub struct Command {
    /// Lower-case name, also used in arity error messages.
    pub name: &'static str,
    /// Argument count including the command name. Negative means "at least
    /// `-arity`".
    pub arity: i32,
    pub handler: HandlerFn,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

impl Command {
    pub fn accepts(&self, argc: usize) -> bool {
        let argc = argc as i64;
        let arity = self.arity as i64;
        if arity >= 0 {
            argc == arity
        } else {
            argc >= -arity
        }
    }
}

#[derive(Debug)]
pub struct CommandTable {
    commands: HashMap<&'static str, Command>,
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandTable {
    /// Builds the table with every supported command.
    pub fn new() -> Self {
        let mut table = Self {
            commands: HashMap::new(),
        };
        string::register(&mut table);
        set::register(&mut table);
        hash::register(&mut table);
        zset::register(&mut table);
        keys::register(&mut table);
        server::register(&mut table);
        table
    }

    pub(crate) fn add(&mut self, name: &'static str, arity: i32, handler: HandlerFn) {
        debug_assert!(
            name.chars().all(|c| !c.is_ascii_uppercase()),
            "command names are registered in lower case"
        );
        let previous = self.commands.insert(
            name,
            Command {
                name,
                arity,
                handler,
            },
        );
        debug_assert!(previous.is_none(), "command '{}' registered twice", name);
    }

    /// Looks up a command by its lower-case name.
    pub fn get(&self, name: &str) -> Option<&Command> {
        self.commands.get(name)
    }

    /// Every registered name, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.commands.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
