//! Key-value engine abstraction
//!
//! The store only needs a handful of capabilities from the LSM engine
//! underneath it: point get/put, bounded ordered iteration, atomic batches
//! with range deletion, a metrics snapshot, and a feed of lifecycle events.
//! Engines implement [`KvEngine`] and report events to the
//! [`EngineEventListener`] they were opened with.

use std::fmt::Debug;

use crate::Result;

/// Whether a write must reach stable media before the call returns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Durability {
    /// Hand the write to the engine's WAL without forcing an fsync. A crash
    /// of the process may lose the most recent writes.
    #[default]
    Buffered,

    /// fsync the WAL before returning.
    Synced,
}

/// A single operation inside a [`WriteBatch`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    /// Set `key` to `value`.
    Put {
        /// Key to write.
        key: Vec<u8>,
        /// Value to store.
        value: Vec<u8>,
    },

    /// Delete every key in `[start, end)`.
    DeleteRange {
        /// Inclusive start key.
        start: Vec<u8>,
        /// Exclusive end key.
        end: Vec<u8>,
    },
}

/// Writes applied atomically and in order by [`KvEngine::write`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Create an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty batch with room for `capacity` operations.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ops: Vec::with_capacity(capacity),
        }
    }

    /// Queue a put.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Queue a deletion of `[start, end)`.
    pub fn delete_range(&mut self, start: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::DeleteRange {
            start: start.into(),
            end: end.into(),
        });
    }

    /// Number of queued operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether nothing has been queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Operations in submission order.
    #[must_use]
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Consume the batch.
    #[must_use]
    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Iteration direction within a [`KeyRange`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanDirection {
    /// Smallest key first.
    Forward,
    /// Largest key first.
    Reverse,
}

/// Half-open key range `[lower, upper)` an iterator is confined to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyRange {
    /// Inclusive lower bound.
    pub lower: Vec<u8>,
    /// Exclusive upper bound.
    pub upper: Vec<u8>,
}

impl KeyRange {
    /// Create a range from its bounds.
    pub fn new(lower: impl Into<Vec<u8>>, upper: impl Into<Vec<u8>>) -> Self {
        Self {
            lower: lower.into(),
            upper: upper.into(),
        }
    }

    /// Whether `key` falls inside the range.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.lower.as_slice() && key < self.upper.as_slice()
    }
}

/// Key/value pair yielded by engine iterators.
pub type KvPair = (Vec<u8>, Vec<u8>);

/// Ordered cursor over a [`KeyRange`].
pub type KvIter<'a> = Box<dyn Iterator<Item = Result<KvPair>> + 'a>;

/// Point-in-time engine telemetry used to derive write pressure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineMetrics {
    /// Bytes held by the active and immutable memtables.
    pub memtable_bytes: u64,

    /// Number of unmerged files (or sublevels) in level 0.
    pub level0_files: u64,
}

/// Lifecycle events reported by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EngineEvent {
    /// A new write-ahead log segment was created.
    WalCreated,
    /// A memtable flush finished.
    FlushCompleted,
    /// A background compaction finished.
    CompactionCompleted,
}

/// Receives engine lifecycle events.
///
/// Engines call this from their own background threads, so implementations
/// must return quickly and never call back into the engine.
pub trait EngineEventListener: Send + Sync {
    /// Called once per event.
    fn on_event(&self, event: EngineEvent);
}

/// Capabilities the store needs from the key-value substrate.
///
/// Implementations provide their own synchronization: every method may be
/// called concurrently from several threads.
pub trait KvEngine: Debug + Send + Sync + 'static {
    /// Point lookup.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Single key write.
    fn put(&self, key: &[u8], value: &[u8], durability: Durability) -> Result<()>;

    /// Apply every operation of `batch` atomically, in order.
    fn write(&self, batch: WriteBatch, durability: Durability) -> Result<()>;

    /// Ordered iteration confined to `range`.
    fn iter(&self, range: &KeyRange, direction: ScanDirection) -> Result<KvIter<'_>>;

    /// Current engine telemetry.
    fn metrics(&self) -> Result<EngineMetrics>;

    /// Force buffered writes to stable media.
    fn sync(&self) -> Result<()>;

    /// Release engine resources. Called exactly once by the store.
    fn close(&self) -> Result<()>;

    /// Delete every key in `[start, end)` as one atomic operation.
    fn delete_range(&self, start: &[u8], end: &[u8], durability: Durability) -> Result<()> {
        let mut batch = WriteBatch::with_capacity(1);
        batch.delete_range(start, end);
        self.write(batch, durability)
    }

    /// Smallest key/value in `range`.
    fn first(&self, range: &KeyRange) -> Result<Option<KvPair>> {
        self.iter(range, ScanDirection::Forward)?.next().transpose()
    }

    /// Largest key/value in `range`.
    fn last(&self, range: &KeyRange) -> Result<Option<KvPair>> {
        self.iter(range, ScanDirection::Reverse)?.next().transpose()
    }
}
