//! Key Codec
//!
//! Maps every data type onto the flat, ordered key space of a
//! [`Storage`](crate::storage::Storage) engine. All functions here are pure
//! and total over any byte input.
//!
//! ## Layout
//!
//! ```text
//! Root record (at the raw user key, value always starts with the type tag)
//!   string       key = {key}                     value = 's' {payload}
//!   set/hash/zset key = {key}                    value = tag {count:u32 BE}
//!
//! Collection records (prefix = tag {keylen:u32 BE} {key})
//!   set member   key = 'S' {len} {key} {member}  value = "1"
//!   hash field   key = 'H' {len} {key} {field}   value = {field value}
//!   zset member  key = 'Z' {len} {key} {member}  value = {score as text}
//!   zset score   key = 'z' {len} {key} {score:8} {member}   value = ""
//! ```
//!
//! The length field, not a separator byte, delimits the root key, so root
//! keys and members may contain any bytes. A scan over one collection's
//! prefix never sees records of another key.

use bytes::{BufMut, Bytes, BytesMut};

/// Single-byte type tags.
pub mod tag {
    pub const STRING: u8 = b's';
    pub const SET: u8 = b'S';
    pub const HASH: u8 = b'H';
    pub const ZSET: u8 = b'Z';
    /// Auxiliary score index for sorted sets.
    pub const ZSET_SCORE: u8 = b'z';
}

/// Value stored in every set member record.
pub const MEMBER_SENTINEL: &[u8] = b"1";

/// Size of a meta record: tag + u32 count.
pub const META_LEN: usize = 5;

const LEN_FIELD: usize = 4;

/// The type owning a root key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    String,
    Set,
    Hash,
    ZSet,
}

impl KeyType {
    pub fn tag(self) -> u8 {
        match self {
            KeyType::String => tag::STRING,
            KeyType::Set => tag::SET,
            KeyType::Hash => tag::HASH,
            KeyType::ZSet => tag::ZSET,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            tag::STRING => Some(KeyType::String),
            tag::SET => Some(KeyType::Set),
            tag::HASH => Some(KeyType::Hash),
            tag::ZSET => Some(KeyType::ZSet),
            _ => None,
        }
    }

    /// Name reported by `TYPE`.
    pub fn name(self) -> &'static str {
        match self {
            KeyType::String => "string",
            KeyType::Set => "set",
            KeyType::Hash => "hash",
            KeyType::ZSet => "zset",
        }
    }

    pub fn is_collection(self) -> bool {
        !matches!(self, KeyType::String)
    }
}

/// A decoded root record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootValue {
    /// String payload with the tag stripped.
    String(Bytes),
    /// Meta record of a collection.
    Collection { kind: KeyType, count: u32 },
}

impl RootValue {
    pub fn kind(&self) -> KeyType {
        match self {
            RootValue::String(_) => KeyType::String,
            RootValue::Collection { kind, .. } => *kind,
        }
    }
}

fn prefixed(tag: u8, root: &[u8], extra: usize) -> BytesMut {
    let mut buf = BytesMut::with_capacity(1 + LEN_FIELD + root.len() + extra);
    buf.put_u8(tag);
    buf.put_u32(root.len() as u32);
    buf.put_slice(root);
    buf
}

/// `tag {len} {root}`: the scan prefix shared by every record of a collection.
pub fn collection_prefix(kind: KeyType, root: &[u8]) -> Bytes {
    prefixed(kind.tag(), root, 0).freeze()
}

/// `z {len} {root}`: the scan prefix of a sorted set's score index.
pub fn score_prefix(root: &[u8]) -> Bytes {
    prefixed(tag::ZSET_SCORE, root, 0).freeze()
}

/// Prefixes holding the records of a collection of type `kind`.
pub fn content_prefixes(kind: KeyType, root: &[u8]) -> Vec<Bytes> {
    match kind {
        KeyType::String => Vec::new(),
        KeyType::ZSet => vec![collection_prefix(kind, root), score_prefix(root)],
        _ => vec![collection_prefix(kind, root)],
    }
}

/// Prefixes of the records owned by the root record `key = value`. Empty for
/// strings and for values that are not a root record.
pub fn owned_prefixes(key: &[u8], value: &Bytes) -> Vec<Bytes> {
    match decode_root(value) {
        Some(RootValue::Collection { kind, .. }) => content_prefixes(kind, key),
        _ => Vec::new(),
    }
}

/// Key of one element of a collection.
pub fn member_key(kind: KeyType, root: &[u8], member: &[u8]) -> Bytes {
    let mut buf = prefixed(kind.tag(), root, member.len());
    buf.put_slice(member);
    buf.freeze()
}

pub fn set_member_key(root: &[u8], member: &[u8]) -> Bytes {
    member_key(KeyType::Set, root, member)
}

pub fn field_key(root: &[u8], field: &[u8]) -> Bytes {
    member_key(KeyType::Hash, root, field)
}

pub fn zset_member_key(root: &[u8], member: &[u8]) -> Bytes {
    member_key(KeyType::ZSet, root, member)
}

/// Key of a sorted-set score index record.
pub fn score_key(root: &[u8], score: f64, member: &[u8]) -> Bytes {
    let mut buf = prefixed(tag::ZSET_SCORE, root, 8 + member.len());
    buf.put_slice(&encode_score(score));
    buf.put_slice(member);
    buf.freeze()
}

/// Byte offset at which the member (or field) begins inside a collection key.
#[inline]
pub fn member_offset(root: &[u8]) -> usize {
    1 + LEN_FIELD + root.len()
}

/// Strips the collection prefix from an encoded key.
pub fn strip_member<'a>(encoded: &'a [u8], root: &[u8]) -> &'a [u8] {
    encoded.get(member_offset(root)..).unwrap_or_default()
}

/// Re-keys a collection record of `from` under the root `to`, keeping its tag
/// and suffix.
pub fn rebase_key(record: &[u8], from: &[u8], to: &[u8]) -> Bytes {
    let suffix = strip_member(record, from);
    let mut buf = prefixed(record[0], to, suffix.len());
    buf.put_slice(suffix);
    buf.freeze()
}

/// Order-preserving encoding of an `f64`: byte-wise comparison of the output
/// matches numeric comparison of the input.
pub fn encode_score(score: f64) -> [u8; 8] {
    let bits = score.to_bits();
    let ordered = if bits >> 63 == 1 {
        !bits
    } else {
        bits ^ (1 << 63)
    };
    ordered.to_be_bytes()
}

pub fn decode_score(bytes: [u8; 8]) -> f64 {
    let ordered = u64::from_be_bytes(bytes);
    let bits = if ordered >> 63 == 1 {
        ordered ^ (1 << 63)
    } else {
        !ordered
    };
    f64::from_bits(bits)
}

pub fn encode_meta(kind: KeyType, count: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(META_LEN);
    buf.put_u8(kind.tag());
    buf.put_u32(count);
    buf.freeze()
}

pub fn encode_string(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + payload.len());
    buf.put_u8(tag::STRING);
    buf.put_slice(payload);
    buf.freeze()
}

/// Decodes a root record. Returns `None` for bytes that are not a valid
/// string or meta record.
pub fn decode_root(value: &Bytes) -> Option<RootValue> {
    let (&first, rest) = value.split_first()?;
    match KeyType::from_tag(first)? {
        KeyType::String => Some(RootValue::String(value.slice(1..))),
        kind => {
            let count: [u8; 4] = rest.try_into().ok()?;
            Some(RootValue::Collection {
                kind,
                count: u32::from_be_bytes(count),
            })
        }
    }
}

/// Canonical text form of a score or float value: the shortest decimal that
/// round-trips, without a fraction for integral values.
pub fn format_float(value: f64) -> String {
    if value == 0.0 {
        // normalizes -0
        return "0".to_string();
    }
    format!("{}", value)
}

/// Parses a float argument; NaN is rejected.
pub fn parse_float(bytes: &[u8]) -> Option<f64> {
    let s = std::str::from_utf8(bytes).ok()?;
    let value: f64 = s.parse().ok()?;
    (!value.is_nan()).then_some(value)
}

/// Parses a base-10 signed 64-bit integer with no surrounding whitespace.
pub fn parse_int(bytes: &[u8]) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}
