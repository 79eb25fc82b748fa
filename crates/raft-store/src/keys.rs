//! Key layout shared by the log and the stable store.
//!
//! Both stores live in one physical keyspace. Every key starts with a one
//! byte namespace tag:
//!
//! | tag    | suffix                           |
//! |--------|----------------------------------|
//! | `0x00` | log index, 8 bytes big-endian    |
//! | `0x01` | caller supplied metadata key     |
//!
//! Log suffixes are fixed width, so byte order of the keys equals numeric
//! order of the indices. First and last index are answered by asking the
//! engine for the smallest and largest key under the log tag.

use std::fmt::{Display, Formatter};

use bytes::Bytes;

use crate::{Error, Result};

/// Tag byte of the log namespace.
pub const LOG_TAG: u8 = 0x00;

/// Tag byte of the metadata namespace.
pub const META_TAG: u8 = 0x01;

/// Length of an encoded log key: tag plus a big-endian `u64`.
pub const LOG_KEY_LEN: usize = 1 + size_of::<u64>();

/// Key of the log entry at `index`.
#[must_use]
pub fn log_key(index: u64) -> [u8; LOG_KEY_LEN] {
    let mut key = [0u8; LOG_KEY_LEN];
    key[0] = LOG_TAG;
    key[1..].copy_from_slice(&index.to_be_bytes());
    key
}

/// Key of the metadata value stored under `key`.
#[must_use]
pub fn meta_key(key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + key.len());
    out.push(META_TAG);
    out.extend_from_slice(key);
    out
}

/// Decode the index from a key read back out of the log namespace.
pub fn decode_log_key(key: &[u8]) -> Result<u64> {
    match key.split_first() {
        Some((&LOG_TAG, suffix)) => {
            let suffix: [u8; 8] = suffix.try_into().map_err(|_| {
                Error::Encoding(format!(
                    "log key suffix is {} bytes, expected 8",
                    suffix.len()
                ))
            })?;
            Ok(u64::from_be_bytes(suffix))
        }
        Some((tag, _)) => Err(Error::Encoding(format!(
            "key tag 0x{tag:02x} is not in the log namespace"
        ))),
        None => Err(Error::Encoding("empty log key".to_string())),
    }
}

/// Inclusive lower bound of the whole log namespace.
#[must_use]
pub const fn log_lower_bound() -> [u8; 1] {
    [LOG_TAG]
}

/// Exclusive upper bound of the whole log namespace.
#[must_use]
pub const fn log_upper_bound() -> [u8; 1] {
    [META_TAG]
}

/// Exclusive upper key that covers every index up to and including
/// `max_index`.
///
/// `log_key(max_index + 1)` would wrap to index 0 for `u64::MAX`, so the
/// end of the namespace is used there instead.
#[must_use]
pub fn log_range_end(max_index: u64) -> Vec<u8> {
    match max_index.checked_add(1) {
        Some(next) => log_key(next).to_vec(),
        None => log_upper_bound().to_vec(),
    }
}

/// Encode a metadata counter (term, vote) as 8 big-endian bytes.
#[must_use]
pub const fn encode_u64(value: u64) -> [u8; 8] {
    value.to_be_bytes()
}

/// Decode a metadata counter written by [`encode_u64`].
pub fn decode_u64(key: &MetadataKey, bytes: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = bytes.try_into().map_err(|_| {
        Error::Encoding(format!(
            "metadata value for {key} is {} bytes, expected 8",
            bytes.len()
        ))
    })?;
    Ok(u64::from_be_bytes(bytes))
}

/// A caller supplied key in the metadata namespace.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetadataKey(Bytes);

impl MetadataKey {
    /// Create a new metadata key from bytes
    pub fn new(key: impl Into<Bytes>) -> Self {
        Self(key.into())
    }

    /// Get the raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Display for MetadataKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) if !s.chars().any(char::is_control) => write!(f, "{s}"),
            _ => write!(f, "0x{}", hex::encode(&self.0)),
        }
    }
}

impl From<&[u8]> for MetadataKey {
    fn from(bytes: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(bytes))
    }
}

impl From<&str> for MetadataKey {
    fn from(key: &str) -> Self {
        Self(Bytes::copy_from_slice(key.as_bytes()))
    }
}

impl From<Vec<u8>> for MetadataKey {
    fn from(key: Vec<u8>) -> Self {
        Self(Bytes::from(key))
    }
}
