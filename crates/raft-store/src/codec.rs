//! Binary format of stored log entries.
//!
//! A stored entry is one format byte followed by a CBOR document of the
//! [`LogEntry`]. The format byte lets the layout change without rewriting
//! existing logs.

use crate::entry::LogEntry;
use crate::{Error, Result};

/// Current format byte.
pub const FORMAT_V1: u8 = 0x01;

/// Default upper bound on an encoded entry.
pub const DEFAULT_MAX_ENTRY_BYTES: usize = 64 * 1024 * 1024;

/// Encodes and decodes log entries independently of the key-value engine.
#[derive(Clone, Copy, Debug)]
pub struct EntryCodec {
    max_entry_bytes: usize,
}

impl Default for EntryCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRY_BYTES)
    }
}

impl EntryCodec {
    /// Create a codec that refuses to encode entries larger than
    /// `max_entry_bytes`.
    #[must_use]
    pub const fn new(max_entry_bytes: usize) -> Self {
        Self { max_entry_bytes }
    }

    /// Largest encoded entry this codec will produce.
    #[must_use]
    pub const fn max_entry_bytes(&self) -> usize {
        self.max_entry_bytes
    }

    /// Encode an entry into a stored blob.
    pub fn encode(&self, entry: &LogEntry) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(entry.data.len() + 32);
        buf.push(FORMAT_V1);
        ciborium::into_writer(entry, &mut buf).map_err(|e| {
            Error::Encoding(format!("failed to encode log entry {}: {e}", entry.index))
        })?;

        if buf.len() > self.max_entry_bytes {
            return Err(Error::Encoding(format!(
                "log entry {} encodes to {} bytes, limit is {}",
                entry.index,
                buf.len(),
                self.max_entry_bytes
            )));
        }

        Ok(buf)
    }

    /// Decode a stored blob.
    pub fn decode(&self, bytes: &[u8]) -> Result<LogEntry> {
        match bytes.split_first() {
            Some((&FORMAT_V1, body)) => {
                let mut reader = body;
                let entry: LogEntry = ciborium::from_reader(&mut reader)
                    .map_err(|e| Error::Encoding(format!("failed to decode log entry: {e}")))?;
                if !reader.is_empty() {
                    return Err(Error::Encoding(format!(
                        "{} trailing bytes after log entry",
                        reader.len()
                    )));
                }
                Ok(entry)
            }
            Some((format, _)) => Err(Error::Encoding(format!(
                "unsupported log entry format 0x{format:02x}"
            ))),
            None => Err(Error::Encoding("empty log entry blob".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::LogEntryType;
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_full_entry_survives_encoding() {
        let codec = EntryCodec::default();
        let entry = LogEntry::new(9, 4, "state change")
            .with_type(LogEntryType::Configuration)
            .with_extensions(&b"\x00\x01"[..])
            .with_appended_at(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());

        let blob = codec.encode(&entry).unwrap();
        assert_eq!(blob[0], FORMAT_V1);
        assert_eq!(codec.decode(&blob).unwrap(), entry);
    }

    #[test]
    fn test_empty_payload() {
        let codec = EntryCodec::default();
        let entry = LogEntry::new(1, 1, Bytes::new()).with_type(LogEntryType::Noop);
        assert_eq!(codec.decode(&codec.encode(&entry).unwrap()).unwrap(), entry);
    }

    #[test]
    fn test_oversized_entry_rejected() {
        let codec = EntryCodec::new(64);
        let err = codec.encode(&LogEntry::new(5, 1, vec![0u8; 128])).unwrap_err();
        assert!(err.is_encoding());
        assert!(err.to_string().contains("log entry 5"));
    }

    #[test]
    fn test_malformed_blobs() {
        let codec = EntryCodec::default();
        assert!(codec.decode(&[]).unwrap_err().is_encoding());
        assert!(codec.decode(&[0x7f, 0xa0]).unwrap_err().is_encoding());
        assert!(codec.decode(&[FORMAT_V1, 0xff, 0x00]).unwrap_err().is_encoding());

        // Truncated body of a valid blob.
        let blob = codec.encode(&LogEntry::new(1, 1, "abc")).unwrap();
        assert!(codec.decode(&blob[..blob.len() - 2]).unwrap_err().is_encoding());
    }

    #[test]
    fn test_trailing_bytes_are_rejected() {
        let codec = EntryCodec::default();
        let mut blob = codec.encode(&LogEntry::new(3, 1, "abc")).unwrap();
        blob.extend_from_slice(b"junk");

        let err = codec.decode(&blob).unwrap_err();
        assert!(err.is_encoding());
        assert!(err.to_string().contains("4 trailing bytes"));
    }

    #[test]
    fn test_unknown_entry_type_is_rejected() {
        #[derive(serde::Serialize)]
        struct Raw {
            index: u64,
            term: u64,
            entry_type: u8,
            data: Bytes,
        }

        let mut blob = vec![FORMAT_V1];
        ciborium::into_writer(
            &Raw {
                index: 1,
                term: 1,
                entry_type: 42,
                data: Bytes::new(),
            },
            &mut blob,
        )
        .unwrap();

        assert!(EntryCodec::default().decode(&blob).unwrap_err().is_encoding());
    }
}
