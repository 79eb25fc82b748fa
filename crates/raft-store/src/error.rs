use std::path::PathBuf;

use thiserror::Error;

use crate::keys::MetadataKey;

/// Boxed error coming out of the key-value engine, kept as-is.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Operation attempted after the store was closed.
    #[error("store is closed")]
    Closed,

    /// Invalid tuning profile or store options.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Stored bytes could not be decoded, or an entry could not be encoded.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Failure reported by the underlying key-value engine.
    #[error("storage engine error: {0}")]
    Engine(#[source] BoxError),

    /// No log entry exists at the requested index.
    #[error("log entry {0} not found")]
    EntryNotFound(u64),

    /// IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// No metadata value is stored under the requested key.
    #[error("metadata key {0} not found")]
    MetadataKeyNotFound(MetadataKey),

    /// The underlying engine could not be opened.
    #[error("failed to open storage engine at {}: {source}", path.display())]
    Open {
        /// Directory the engine was asked to open.
        path: PathBuf,

        /// The engine's own error.
        #[source]
        source: BoxError,
    },
}

impl Error {
    /// Wraps an engine error without interpreting it.
    pub fn engine<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Engine(Box::new(error))
    }

    /// Returns `true` for the expected-absence conditions the consensus layer
    /// branches on rather than treating as faults.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::EntryNotFound(_) | Self::MetadataKeyNotFound(_))
    }

    /// Returns `true` if stored data (or an entry being written) was malformed.
    #[must_use]
    pub const fn is_encoding(&self) -> bool {
        matches!(self, Self::Encoding(_))
    }
}
