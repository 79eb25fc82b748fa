//! RocksDB engine for the raft store
//!
//! Log entries and metadata share the default column family; the key codec
//! of `proven-raft-store` keeps them apart. Writes go through the WAL and
//! are only fsynced when the store's durability asks for it.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
mod events;

use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use proven_raft_store::{
    BatchOp, Durability, EngineEvent, EngineEventListener, EngineMetrics, Error, KeyRange,
    KvEngine, KvIter, KvPair, RaftStore, Result, ScanDirection, WriteBatch,
};
use rocksdb::{IteratorMode, Options, ReadOptions, WriteOptions};
use tracing::{debug, info};

pub use config::{EngineOptions, RocksDbConfig};

use events::{Db, EventPump, LEVEL0_FILES, MEMTABLE_BYTES, int_property};

/// Raft store backed by RocksDB.
pub type RocksDbStore = RaftStore<RocksDbEngine>;

/// Open (creating if needed) a RocksDB backed raft store.
pub fn open(config: RocksDbConfig) -> Result<RocksDbStore> {
    let (options, thresholds) = config.resolve()?;

    std::fs::create_dir_all(&config.path).map_err(|e| Error::Open {
        path: config.path.clone(),
        source: Box::new(e),
    })?;

    RaftStore::open(config.store.clone(), thresholds, |listener| {
        RocksDbEngine::open(&config.path, &options, listener, config.event_poll_interval)
    })
}

/// RocksDB key-value engine.
pub struct RocksDbEngine {
    db: Arc<Db>,
    path: PathBuf,
    listener: Arc<dyn EngineEventListener>,
    pump: Mutex<Option<EventPump>>,
    closed: AtomicBool,
}

impl RocksDbEngine {
    /// Open the database at `path`, reporting lifecycle events to
    /// `listener`. Properties are sampled every `poll_interval`.
    pub fn open(
        path: impl AsRef<Path>,
        options: &Options,
        listener: Arc<dyn EngineEventListener>,
        poll_interval: Duration,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let db = Db::open(options, &path).map_err(|e| Error::Open {
            path: path.clone(),
            source: Box::new(e),
        })?;
        let db = Arc::new(db);

        // Opening always starts a fresh WAL.
        listener.on_event(EngineEvent::WalCreated);

        let pump = EventPump::start(Arc::clone(&db), Arc::clone(&listener), poll_interval)?;
        info!("opened rocksdb at {}", path.display());

        Ok(Self {
            db,
            path,
            listener,
            pump: Mutex::new(Some(pump)),
            closed: AtomicBool::new(false),
        })
    }

    /// Directory the database lives in.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush the memtables to level 0 and report it.
    pub fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        self.db.flush().map_err(Error::engine)?;
        debug!("flushed rocksdb memtables");
        self.listener.on_event(EngineEvent::FlushCompleted);
        Ok(())
    }

    /// Compact the whole keyspace and report it.
    pub fn compact(&self) -> Result<()> {
        self.ensure_open()?;
        self.db.compact_range::<&[u8], &[u8]>(None, None);
        debug!("compacted rocksdb keyspace");
        self.listener.on_event(EngineEvent::CompactionCompleted);
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn stop_pump(&self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.stop();
        }
    }

    fn write_options(durability: Durability) -> WriteOptions {
        let mut options = WriteOptions::default();
        options.set_sync(durability == Durability::Synced);
        options
    }
}

impl KvEngine for RocksDbEngine {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        self.db.get(key).map_err(Error::engine)
    }

    fn put(&self, key: &[u8], value: &[u8], durability: Durability) -> Result<()> {
        self.ensure_open()?;
        self.db
            .put_opt(key, value, &Self::write_options(durability))
            .map_err(Error::engine)
    }

    fn write(&self, batch: WriteBatch, durability: Durability) -> Result<()> {
        self.ensure_open()?;
        let mut rocks_batch = rocksdb::WriteBatch::default();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => rocks_batch.put(key, value),
                BatchOp::DeleteRange { start, end } => rocks_batch.delete_range(start, end),
            }
        }

        self.db
            .write_opt(rocks_batch, &Self::write_options(durability))
            .map_err(Error::engine)
    }

    fn iter(&self, range: &KeyRange, direction: ScanDirection) -> Result<KvIter<'_>> {
        self.ensure_open()?;
        if range.lower >= range.upper {
            return Ok(Box::new(std::iter::empty::<Result<KvPair>>()));
        }

        let mut read_options = ReadOptions::default();
        read_options.set_iterate_lower_bound(range.lower.clone());
        read_options.set_iterate_upper_bound(range.upper.clone());
        let mode = match direction {
            ScanDirection::Forward => IteratorMode::Start,
            ScanDirection::Reverse => IteratorMode::End,
        };

        let iter = self.db.iterator_opt(mode, read_options).map(|item| {
            item.map(|(key, value)| (key.into_vec(), value.into_vec()))
                .map_err(Error::engine)
        });
        Ok(Box::new(iter))
    }

    fn metrics(&self) -> Result<EngineMetrics> {
        self.ensure_open()?;
        Ok(EngineMetrics {
            memtable_bytes: int_property(&self.db, MEMTABLE_BYTES)?,
            level0_files: int_property(&self.db, LEVEL0_FILES)?,
        })
    }

    fn sync(&self) -> Result<()> {
        self.ensure_open()?;
        self.db.flush_wal(true).map_err(Error::engine)
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.stop_pump();
        self.db.flush().map_err(Error::engine)?;
        self.db.cancel_all_background_work(true);
        info!("closed rocksdb at {}", self.path.display());
        Ok(())
    }
}

impl Debug for RocksDbEngine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksDbEngine")
            .field("path", &self.path)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Drop for RocksDbEngine {
    fn drop(&mut self) {
        // The pump holds a handle to the database; stop it so the database
        // is released with the engine.
        self.stop_pump();
    }
}
