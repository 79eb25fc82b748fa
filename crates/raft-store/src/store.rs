//! Log and stable store on top of a single key-value engine

use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, error, info};

use crate::codec::EntryCodec;
use crate::config::{PressureThresholds, StoreOptions};
use crate::engine::{
    Durability, EngineEventListener, KeyRange, KvEngine, ScanDirection, WriteBatch,
};
use crate::entry::LogEntry;
use crate::keys::{self, MetadataKey};
use crate::log::{LogStore, StableStore};
use crate::monitor::{HealthMonitor, Pressure};
use crate::{Error, Result};

/// Raft log and stable store sharing one engine keyspace.
///
/// Every write is issued with the configured [`Durability`]. With the
/// default [`Durability::Buffered`] a write is in the engine's WAL but not
/// necessarily on stable media when the call returns, so a process crash
/// may lose the most recent writes. Call [`RaftStore::sync`] where a
/// durability point is needed.
pub struct RaftStore<E: KvEngine> {
    engine: RwLock<Option<Arc<E>>>,
    monitor: HealthMonitor<E>,
    codec: EntryCodec,
    durability: Durability,
}

impl<E: KvEngine> RaftStore<E> {
    /// Open a store.
    ///
    /// `open_engine` receives the listener the engine must report lifecycle
    /// events to. The health monitor is started before the engine opens and
    /// only begins evaluating once the engine has been handed over.
    pub fn open<F>(
        options: StoreOptions,
        thresholds: PressureThresholds,
        open_engine: F,
    ) -> Result<Self>
    where
        F: FnOnce(Arc<dyn EngineEventListener>) -> Result<E>,
    {
        let monitor = HealthMonitor::start(
            thresholds,
            options.busy_callback.clone(),
            options.shutdown_timeout,
        )?;

        let engine = match open_engine(monitor.listener()) {
            Ok(engine) => Arc::new(engine),
            Err(e) => {
                monitor.stop();
                return Err(e);
            }
        };
        monitor.attach(Arc::clone(&engine));

        info!(
            durability = ?options.durability,
            max_entry_bytes = options.max_entry_bytes,
            "raft store opened on {engine:?}"
        );

        Ok(Self {
            engine: RwLock::new(Some(engine)),
            monitor,
            codec: EntryCodec::new(options.max_entry_bytes),
            durability: options.durability,
        })
    }

    /// The engine handle, or [`Error::Closed`].
    pub fn engine(&self) -> Result<Arc<E>> {
        self.engine.read().as_ref().map(Arc::clone).ok_or(Error::Closed)
    }

    /// Durability applied to every write.
    #[must_use]
    pub const fn durability(&self) -> Durability {
        self.durability
    }

    /// Write pressure from the most recent engine event.
    #[must_use]
    pub fn pressure(&self) -> Pressure {
        self.monitor.pressure()
    }

    /// Force buffered writes to stable media.
    pub fn sync(&self) -> Result<()> {
        self.engine()?.sync()
    }

    /// Whether [`RaftStore::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.engine.read().is_none()
    }

    /// Stop the health monitor, then close the engine. Operations after
    /// this fail with [`Error::Closed`]. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let Some(engine) = self.engine.write().take() else {
            return Ok(());
        };

        self.monitor.stop();
        engine.close()?;
        info!("raft store closed");
        Ok(())
    }

    fn log_range() -> KeyRange {
        KeyRange::new(keys::log_lower_bound(), keys::log_upper_bound())
    }

    fn decode_entry(&self, index: u64, bytes: &[u8]) -> Result<LogEntry> {
        let entry = self.codec.decode(bytes)?;
        if entry.index != index {
            return Err(Error::Encoding(format!(
                "entry stored under index {index} carries index {}",
                entry.index
            )));
        }
        Ok(entry)
    }
}

impl<E: KvEngine> LogStore for RaftStore<E> {
    fn first_index(&self) -> Result<Option<u64>> {
        self.engine()?
            .first(&Self::log_range())?
            .map(|(key, _)| keys::decode_log_key(&key))
            .transpose()
    }

    fn last_index(&self) -> Result<Option<u64>> {
        self.engine()?
            .last(&Self::log_range())?
            .map(|(key, _)| keys::decode_log_key(&key))
            .transpose()
    }

    fn get_entry(&self, index: u64) -> Result<LogEntry> {
        match self.engine()?.get(&keys::log_key(index))? {
            Some(bytes) => self.decode_entry(index, &bytes),
            None => Err(Error::EntryNotFound(index)),
        }
    }

    fn get_entries(&self, start: u64, end: u64) -> Result<Vec<LogEntry>> {
        if start >= end {
            return Ok(Vec::new());
        }

        let engine = self.engine()?;
        let range = KeyRange::new(keys::log_key(start), keys::log_key(end));
        engine
            .iter(&range, ScanDirection::Forward)?
            .map(|item| {
                let (key, value) = item?;
                self.decode_entry(keys::decode_log_key(&key)?, &value)
            })
            .collect()
    }

    fn append_entry(&self, entry: &LogEntry) -> Result<()> {
        let value = self.codec.encode(entry)?;
        self.engine()?
            .put(&keys::log_key(entry.index), &value, self.durability)
    }

    fn append_entries(&self, entries: &[LogEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        // Encode everything before touching the engine so an unencodable
        // entry leaves the log untouched.
        let mut batch = WriteBatch::with_capacity(entries.len());
        for entry in entries {
            batch.put(keys::log_key(entry.index), self.codec.encode(entry)?);
        }

        debug!(
            count = entries.len(),
            first = entries[0].index,
            last = entries[entries.len() - 1].index,
            "appending log entries"
        );
        self.engine()?.write(batch, self.durability)
    }

    fn delete_range(&self, min_index: u64, max_index: u64) -> Result<()> {
        if min_index > max_index {
            debug!(min_index, max_index, "empty delete range, nothing to do");
            return Ok(());
        }

        debug!(min_index, max_index, "deleting log range");
        self.engine()?.delete_range(
            &keys::log_key(min_index),
            &keys::log_range_end(max_index),
            self.durability,
        )
    }
}

impl<E: KvEngine> StableStore for RaftStore<E> {
    fn set_metadata(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.engine()?
            .put(&keys::meta_key(key), value, self.durability)
    }

    fn get_metadata(&self, key: &[u8]) -> Result<Bytes> {
        self.engine()?
            .get(&keys::meta_key(key))?
            .map(Bytes::from)
            .ok_or_else(|| Error::MetadataKeyNotFound(MetadataKey::from(key)))
    }
}

impl<E: KvEngine> Debug for RaftStore<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaftStore")
            .field("engine", &*self.engine.read())
            .field("durability", &self.durability)
            .field("monitor", &self.monitor)
            .finish_non_exhaustive()
    }
}

impl<E: KvEngine> Drop for RaftStore<E> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("failed to close raft store: {e}");
        }
    }
}
