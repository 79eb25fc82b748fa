//! Log entry model handed to the store by the consensus layer.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a replicated log entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum LogEntryType {
    /// Applied to the user state machine.
    #[default]
    Command = 0,

    /// Appended by a new leader to establish its term.
    Noop = 1,

    /// Legacy peer addition, kept for reading old logs.
    AddPeerDeprecated = 2,

    /// Legacy peer removal, kept for reading old logs.
    RemovePeerDeprecated = 3,

    /// Ensures all preceding entries are applied before continuing.
    Barrier = 4,

    /// Cluster membership change.
    Configuration = 5,
}

impl From<LogEntryType> for u8 {
    fn from(value: LogEntryType) -> Self {
        value as Self
    }
}

impl TryFrom<u8> for LogEntryType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Command),
            1 => Ok(Self::Noop),
            2 => Ok(Self::AddPeerDeprecated),
            3 => Ok(Self::RemovePeerDeprecated),
            4 => Ok(Self::Barrier),
            5 => Ok(Self::Configuration),
            other => Err(format!("unknown log entry type {other}")),
        }
    }
}

/// A single entry of the replicated log.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position in the log. Unique per entry.
    pub index: u64,

    /// Election term the entry was created in.
    pub term: u64,

    /// What the entry carries.
    pub entry_type: LogEntryType,

    /// Opaque payload.
    pub data: Bytes,

    /// Opaque extension data owned by the consensus layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Bytes>,

    /// When the leader appended the entry, if recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appended_at: Option<DateTime<Utc>>,
}

impl LogEntry {
    /// Create a command entry.
    pub fn new(index: u64, term: u64, data: impl Into<Bytes>) -> Self {
        Self {
            index,
            term,
            entry_type: LogEntryType::Command,
            data: data.into(),
            extensions: None,
            appended_at: None,
        }
    }

    /// Set the entry type.
    #[must_use]
    pub const fn with_type(mut self, entry_type: LogEntryType) -> Self {
        self.entry_type = entry_type;
        self
    }

    /// Attach extension data.
    #[must_use]
    pub fn with_extensions(mut self, extensions: impl Into<Bytes>) -> Self {
        self.extensions = Some(extensions.into());
        self
    }

    /// Record the append time.
    #[must_use]
    pub const fn with_appended_at(mut self, appended_at: DateTime<Utc>) -> Self {
        self.appended_at = Some(appended_at);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_type_byte_values() {
        for byte in 0u8..=5 {
            let ty = LogEntryType::try_from(byte).unwrap();
            assert_eq!(u8::from(ty), byte);
        }
        assert!(LogEntryType::try_from(6).is_err());
    }

    #[test]
    fn test_builder() {
        let entry = LogEntry::new(3, 2, "payload")
            .with_type(LogEntryType::Barrier)
            .with_extensions(&b"ext"[..]);
        assert_eq!(entry.index, 3);
        assert_eq!(entry.term, 2);
        assert_eq!(entry.entry_type, LogEntryType::Barrier);
        assert_eq!(entry.data, Bytes::from("payload"));
        assert_eq!(entry.extensions, Some(Bytes::from_static(b"ext")));
        assert_eq!(entry.appended_at, None);
    }
}
