//! Storage interfaces consumed by the consensus layer
//!
//! Two logically separate stores:
//! - [`LogStore`] holds the replicated log, keyed by index
//! - [`StableStore`] holds small values that must survive a restart
//!   (current term, last vote)
//!
//! Absence is not a fault. An empty log reports `None` from the bound
//! queries (callers treat it as index 0), and point lookups of missing
//! entries or keys return [`crate::Error::EntryNotFound`] and
//! [`crate::Error::MetadataKeyNotFound`], which [`crate::Error::is_not_found`] recognises.

use bytes::Bytes;

use crate::entry::LogEntry;
use crate::keys::{self, MetadataKey};
use crate::Result;

/// Ordered, durable storage of log entries.
pub trait LogStore: Send + Sync {
    /// Smallest stored index, `None` when the log is empty.
    fn first_index(&self) -> Result<Option<u64>>;

    /// Largest stored index, `None` when the log is empty.
    fn last_index(&self) -> Result<Option<u64>>;

    /// Entry at `index`, or [`crate::Error::EntryNotFound`].
    fn get_entry(&self, index: u64) -> Result<LogEntry>;

    /// Entries with `start <= index < end`, in index order.
    fn get_entries(&self, start: u64, end: u64) -> Result<Vec<LogEntry>>;

    /// Store a single entry.
    fn append_entry(&self, entry: &LogEntry) -> Result<()>;

    /// Store several entries atomically: all of them become visible or none
    /// do.
    fn append_entries(&self, entries: &[LogEntry]) -> Result<()>;

    /// Delete every entry with `min_index <= index <= max_index` as one
    /// atomic operation. Inclusive on both ends.
    fn delete_range(&self, min_index: u64, max_index: u64) -> Result<()>;

    /// First and last index together, `None` when the log is empty.
    fn bounds(&self) -> Result<Option<(u64, u64)>> {
        match (self.first_index()?, self.last_index()?) {
            (Some(first), Some(last)) => Ok(Some((first, last))),
            _ => Ok(None),
        }
    }
}

/// Flat key/value storage for values that must survive a restart.
pub trait StableStore: Send + Sync {
    /// Store `value` under `key`.
    fn set_metadata(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Value stored under `key`, or [`crate::Error::MetadataKeyNotFound`].
    fn get_metadata(&self, key: &[u8]) -> Result<Bytes>;

    /// Store a counter as 8 big-endian bytes.
    fn set_u64(&self, key: &[u8], value: u64) -> Result<()> {
        self.set_metadata(key, &keys::encode_u64(value))
    }

    /// Read a counter written by [`StableStore::set_u64`].
    fn get_u64(&self, key: &[u8]) -> Result<u64> {
        let value = self.get_metadata(key)?;
        keys::decode_u64(&MetadataKey::from(key), &value)
    }
}
