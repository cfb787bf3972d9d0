//! Error types for command execution.
//!
//! The `Display` text of every [`CommandError`] is exactly the error reply a
//! client sees, so converting an error into a [`Reply`](crate::Reply) is just
//! `to_string()`.

use crate::storage::StoreError;
use thiserror::Error;

/// Result type alias using CommandError
pub type CommandResult<T> = std::result::Result<T, CommandError>;

#[derive(Debug, Error)]
pub enum CommandError {
    /// Argument count outside the command's arity. Holds the lower-case name.
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    #[error("ERR value is not a valid float")]
    NotFloat,

    #[error("ERR hash value is not an integer")]
    HashNotInteger,

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpireTime(String),

    #[error("ERR value is out of range, must be positive")]
    OutOfRange,

    #[error("ERR increment or decrement would overflow")]
    Overflow,

    #[error("ERR increment would produce NaN or Infinity")]
    NanOrInfinity,

    #[error("ERR no such key")]
    NoSuchKey,

    #[error("NOAUTH Authentication required")]
    NoAuth,

    #[error("ERR invalid password")]
    InvalidPassword,

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    /// A root record whose bytes do not decode.
    #[error("ERR corrupted record at key '{0}'")]
    Corrupted(String),

    #[error("ERR {0}")]
    Storage(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_texts() {
        assert_eq!(
            CommandError::WrongArity("get".into()).to_string(),
            "ERR wrong number of arguments for 'get' command"
        );
        assert_eq!(
            CommandError::InvalidExpireTime("setex".into()).to_string(),
            "ERR invalid expire time in 'setex' command"
        );
        assert_eq!(
            CommandError::NotInteger.to_string(),
            "ERR value is not an integer or out of range"
        );
        assert_eq!(
            CommandError::UnknownCommand("nope".into()).to_string(),
            "ERR unknown command 'nope'"
        );
    }

    #[test]
    fn test_storage_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err: CommandError = StoreError::from(io).into();
        assert_eq!(err.to_string(), "ERR IO error: disk gone");
    }
}
