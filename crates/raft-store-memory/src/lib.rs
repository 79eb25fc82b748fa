//! In-memory engine for the raft store
//!
//! Keeps every key in a `BTreeMap` and simulates the LSM telemetry the busy
//! signal is derived from: writes grow the memtable, [`MemoryEngine::flush`]
//! turns it into a level 0 file and [`MemoryEngine::compact`] merges level 0
//! away. Nothing happens in the background, so tests decide exactly when
//! each lifecycle event fires.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use proven_raft_store::{
    BatchOp, Durability, EngineEvent, EngineEventListener, EngineMetrics, Error, KeyRange,
    KvEngine, KvIter, KvPair, PressureThresholds, RaftStore, Result, ScanDirection,
    StoreOptions, WriteBatch,
};
use tracing::{debug, trace};

/// Pairs copied out of the map per lock acquisition while scanning.
const SCAN_CHUNK: usize = 64;

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

/// Raft store backed by a [`MemoryEngine`].
pub type MemoryStore = RaftStore<MemoryEngine>;

/// Open a raft store on a fresh in-memory engine.
pub fn open(options: StoreOptions, thresholds: PressureThresholds) -> Result<MemoryStore> {
    RaftStore::open(options, thresholds, |listener| {
        Ok(MemoryEngine::with_listener(listener))
    })
}

/// Ordered in-memory key-value engine with simulated LSM telemetry.
pub struct MemoryEngine {
    data: RwLock<Map>,
    metrics: Mutex<EngineMetrics>,
    listener: Option<Arc<dyn EngineEventListener>>,
    last_durability: Mutex<Option<Durability>>,
    syncs: AtomicU64,
    closed: AtomicBool,
}

impl MemoryEngine {
    /// Create an engine that reports no events.
    #[must_use]
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create an engine reporting its lifecycle events to `listener`.
    ///
    /// Like a real engine, opening creates a WAL and reports it.
    #[must_use]
    pub fn with_listener(listener: Arc<dyn EngineEventListener>) -> Self {
        let engine = Self::build(Some(listener));
        engine.emit(EngineEvent::WalCreated);
        engine
    }

    fn build(listener: Option<Arc<dyn EngineEventListener>>) -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            metrics: Mutex::new(EngineMetrics::default()),
            listener,
            last_durability: Mutex::new(None),
            syncs: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Turn the memtable into a level 0 file.
    pub fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        {
            let mut metrics = self.metrics.lock();
            if metrics.memtable_bytes > 0 {
                metrics.memtable_bytes = 0;
                metrics.level0_files += 1;
            }
            debug!(level0_files = metrics.level0_files, "memtable flushed");
        }
        self.emit(EngineEvent::FlushCompleted);
        Ok(())
    }

    /// Merge every level 0 file into the lower levels.
    pub fn compact(&self) -> Result<()> {
        self.ensure_open()?;
        self.metrics.lock().level0_files = 0;
        debug!("level 0 compacted");
        self.emit(EngineEvent::CompactionCompleted);
        Ok(())
    }

    /// Start a new write-ahead log segment.
    pub fn rotate_wal(&self) -> Result<()> {
        self.ensure_open()?;
        self.emit(EngineEvent::WalCreated);
        Ok(())
    }

    /// Number of stored keys across both namespaces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether no key is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Durability of the most recent write, `None` before the first one.
    #[must_use]
    pub fn last_durability(&self) -> Option<Durability> {
        *self.last_durability.lock()
    }

    /// How many times [`KvEngine::sync`] was called.
    #[must_use]
    pub fn sync_count(&self) -> u64 {
        self.syncs.load(Ordering::SeqCst)
    }

    /// Whether [`KvEngine::close`] was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn emit(&self, event: EngineEvent) {
        trace!(?event, "engine event");
        if let Some(listener) = &self.listener {
            listener.on_event(event);
        }
    }

    fn record_write(&self, bytes: usize, durability: Durability) {
        let mut metrics = self.metrics.lock();
        metrics.memtable_bytes = metrics.memtable_bytes.saturating_add(bytes as u64);
        *self.last_durability.lock() = Some(durability);
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl KvEngine for MemoryEngine {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8], durability: Durability) -> Result<()> {
        self.ensure_open()?;
        self.data.write().insert(key.to_vec(), value.to_vec());
        self.record_write(key.len() + value.len(), durability);
        Ok(())
    }

    fn write(&self, batch: WriteBatch, durability: Durability) -> Result<()> {
        self.ensure_open()?;
        let mut written = 0;
        let mut data = self.data.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => {
                    written += key.len() + value.len();
                    data.insert(key, value);
                }
                BatchOp::DeleteRange { start, end } => {
                    written += start.len() + end.len();
                    if start < end {
                        let doomed: Vec<Vec<u8>> = data
                            .range::<[u8], _>((
                                Bound::Included(start.as_slice()),
                                Bound::Excluded(end.as_slice()),
                            ))
                            .map(|(key, _)| key.clone())
                            .collect();
                        for key in doomed {
                            data.remove(&key);
                        }
                    }
                }
            }
        }
        drop(data);
        self.record_write(written, durability);
        Ok(())
    }

    fn iter(&self, range: &KeyRange, direction: ScanDirection) -> Result<KvIter<'_>> {
        self.ensure_open()?;
        if range.lower >= range.upper {
            return Ok(Box::new(std::iter::empty::<Result<KvPair>>()));
        }

        Ok(Box::new(ChunkedScan {
            data: &self.data,
            lower: Bound::Included(range.lower.clone()),
            upper: Bound::Excluded(range.upper.clone()),
            direction,
            buffer: Vec::new().into_iter(),
            exhausted: false,
        }))
    }

    fn first(&self, range: &KeyRange) -> Result<Option<KvPair>> {
        self.ensure_open()?;
        if range.lower >= range.upper {
            return Ok(None);
        }
        Ok(scan(&self.data.read(), range).next().map(clone_pair))
    }

    fn last(&self, range: &KeyRange) -> Result<Option<KvPair>> {
        self.ensure_open()?;
        if range.lower >= range.upper {
            return Ok(None);
        }
        Ok(scan(&self.data.read(), range).next_back().map(clone_pair))
    }

    fn metrics(&self) -> Result<EngineMetrics> {
        self.ensure_open()?;
        Ok(*self.metrics.lock())
    }

    fn sync(&self) -> Result<()> {
        self.ensure_open()?;
        self.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(keys = self.len(), "memory engine closed");
        }
        Ok(())
    }
}

fn scan<'a>(
    data: &'a Map,
    range: &KeyRange,
) -> std::collections::btree_map::Range<'a, Vec<u8>, Vec<u8>> {
    data.range::<[u8], _>((
        Bound::Included(range.lower.as_slice()),
        Bound::Excluded(range.upper.as_slice()),
    ))
}

fn clone_pair((key, value): (&Vec<u8>, &Vec<u8>)) -> KvPair {
    (key.clone(), value.clone())
}

/// Walks a range a chunk at a time, releasing the read lock between chunks
/// so long scans neither copy the whole range up front nor block writers.
struct ChunkedScan<'a> {
    data: &'a RwLock<Map>,
    lower: Bound<Vec<u8>>,
    upper: Bound<Vec<u8>>,
    direction: ScanDirection,
    buffer: std::vec::IntoIter<KvPair>,
    exhausted: bool,
}

impl ChunkedScan<'_> {
    fn refill(&mut self) {
        let data = self.data.read();
        let range = data.range::<[u8], _>((
            self.lower.as_ref().map(Vec::as_slice),
            self.upper.as_ref().map(Vec::as_slice),
        ));
        let chunk: Vec<KvPair> = match self.direction {
            ScanDirection::Forward => range.take(SCAN_CHUNK).map(clone_pair).collect(),
            ScanDirection::Reverse => range.rev().take(SCAN_CHUNK).map(clone_pair).collect(),
        };
        drop(data);

        self.exhausted = chunk.len() < SCAN_CHUNK;
        if let Some((key, _)) = chunk.last() {
            match self.direction {
                ScanDirection::Forward => self.lower = Bound::Excluded(key.clone()),
                ScanDirection::Reverse => self.upper = Bound::Excluded(key.clone()),
            }
        }
        self.buffer = chunk.into_iter();
    }
}

impl Iterator for ChunkedScan<'_> {
    type Item = Result<KvPair>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(pair) = self.buffer.next() {
                return Some(Ok(pair));
            }
            if self.exhausted {
                return None;
            }
            self.refill();
        }
    }
}

impl Debug for MemoryEngine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("keys", &self.len())
            .field("metrics", &*self.metrics.lock())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
