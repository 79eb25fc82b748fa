//! Raft log and stable storage for Proven consensus
//!
//! The replicated log and the small set of values the consensus layer must
//! keep across restarts (term, vote) share one LSM key-value engine. Keys
//! are split into two namespaces by a one byte tag, see [`keys`].
//!
//! Engines plug in through [`KvEngine`]; the RocksDB and in-memory engines
//! live in their own crates.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod codec;
pub mod config;
pub mod engine;
pub mod entry;
mod error;
pub mod keys;
pub mod log;
pub mod monitor;
mod store;

pub use codec::EntryCodec;
pub use config::{
    BusyCallback, LevelTuning, MemoryBudget, PressureThresholds, StoreOptions, TuningProfile,
};
pub use engine::{
    BatchOp, Durability, EngineEvent, EngineEventListener, EngineMetrics, KeyRange, KvEngine,
    KvIter, KvPair, ScanDirection, WriteBatch,
};
pub use entry::{LogEntry, LogEntryType};
pub use error::{BoxError, Error, Result};
pub use keys::MetadataKey;
pub use log::{LogStore, StableStore};
pub use monitor::{HealthMonitor, Pressure};
pub use store::RaftStore;
