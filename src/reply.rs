//! Command Replies
//!
//! Every command produces one [`Reply`]. The shapes mirror what a
//! Redis-style protocol layer can carry:
//!
//! - `Status`  simple status string, e.g. `OK`
//! - `Error`   error string starting with a category token (`ERR`, `WRONGTYPE`, `NOAUTH`)
//! - `Integer` signed 64-bit integer
//! - `Bulk`    binary-safe byte string
//! - `Null`    absent value
//! - `Array`   ordered list of replies, possibly nested
//!
//! Wire framing is left to whoever embeds the command layer. The
//! [`Display`](fmt::Display) impl renders replies the way `redis-cli` does,
//! which is what the bundled console prints.

use crate::error::CommandError;
use bytes::Bytes;
use std::fmt;

/// The result of executing one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Status(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<Reply>),
}

impl Reply {
    pub fn status(s: impl Into<String>) -> Self {
        Reply::Status(s.into())
    }

    /// Creates an error reply.
    ///
    /// # Example
    /// ```
    /// use raptorkv::Reply;
    /// let err = Reply::error("ERR syntax error");
    /// assert!(err.is_error());
    /// ```
    pub fn error(s: impl Into<String>) -> Self {
        Reply::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        Reply::Integer(n)
    }

    /// Creates a bulk string reply.
    ///
    /// # Example
    /// ```
    /// use raptorkv::Reply;
    /// use bytes::Bytes;
    /// let bulk = Reply::bulk(Bytes::from("hello"));
    /// assert_eq!(bulk.as_bytes(), Some(&b"hello"[..]));
    /// ```
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Reply::Bulk(data.into())
    }

    pub fn null() -> Self {
        Reply::Null
    }

    pub fn array(values: Vec<Reply>) -> Self {
        Reply::Array(values)
    }

    /// Array of bulk strings.
    pub fn bulks<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Bytes>,
    {
        Reply::Array(items.into_iter().map(|b| Reply::Bulk(b.into())).collect())
    }

    /// Bulk string when present, null otherwise.
    pub fn optional(value: Option<Bytes>) -> Self {
        value.map(Reply::Bulk).unwrap_or(Reply::Null)
    }

    /// `1` / `0` integer reply.
    pub fn boolean(flag: bool) -> Self {
        Reply::Integer(flag as i64)
    }

    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    pub fn pong() -> Self {
        Reply::Status("PONG".to_string())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Reply::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Reply::Bulk(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Reply]> {
        match self {
            Reply::Array(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Vec<Reply>> {
        match self {
            Reply::Array(arr) => Some(arr),
            _ => None,
        }
    }
}

impl From<CommandError> for Reply {
    fn from(err: CommandError) -> Self {
        Reply::Error(err.to_string())
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Status(s) => write!(f, "{}", s),
            Reply::Error(s) => write!(f, "(error) {}", s),
            Reply::Integer(n) => write!(f, "(integer) {}", n),
            Reply::Bulk(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s.escape_debug()),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            Reply::Null => write!(f, "(nil)"),
            Reply::Array(values) => {
                if values.is_empty() {
                    return write!(f, "(empty array)");
                }
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}) {}", i + 1, v)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_scalars() {
        assert_eq!(Reply::ok().to_string(), "OK");
        assert_eq!(Reply::integer(-3).to_string(), "(integer) -3");
        assert_eq!(Reply::null().to_string(), "(nil)");
        assert_eq!(Reply::bulk(Bytes::from("hi")).to_string(), "\"hi\"");
        assert_eq!(
            Reply::error("ERR syntax error").to_string(),
            "(error) ERR syntax error"
        );
    }

    #[test]
    fn test_display_binary_bulk() {
        let reply = Reply::bulk(Bytes::from_static(&[0xff, 0xfe]));
        assert_eq!(reply.to_string(), "(binary data, 2 bytes)");
    }

    #[test]
    fn test_display_array() {
        let reply = Reply::array(vec![Reply::bulk(Bytes::from("a")), Reply::integer(2)]);
        assert_eq!(reply.to_string(), "1) \"a\"\n2) (integer) 2");
        assert_eq!(Reply::array(vec![]).to_string(), "(empty array)");
    }

    #[test]
    fn test_helpers() {
        assert_eq!(Reply::optional(None), Reply::Null);
        assert_eq!(Reply::boolean(true), Reply::Integer(1));
        assert_eq!(
            Reply::bulks(vec![Bytes::from("x")]),
            Reply::Array(vec![Reply::Bulk(Bytes::from("x"))])
        );
    }

    #[test]
    fn test_from_command_error() {
        let reply: Reply = CommandError::WrongType.into();
        assert_eq!(
            reply,
            Reply::error("WRONGTYPE Operation against a key holding the wrong kind of value")
        );
    }
}
