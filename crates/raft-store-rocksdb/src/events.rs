//! Lifecycle events derived from RocksDB properties
//!
//! The bindings expose no event listener, so a background thread samples a
//! few integer properties and reports a lifecycle event whenever the
//! engine's super version moves on. The super version changes on every
//! memtable switch, flush and compaction.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use proven_raft_store::{EngineEvent, EngineEventListener, Error, Result};
use rocksdb::{DBWithThreadMode, MultiThreaded};
use tracing::{debug, error, trace, warn};

pub(crate) type Db = DBWithThreadMode<MultiThreaded>;

pub(crate) const SUPER_VERSION: &str = "rocksdb.current-super-version-number";
pub(crate) const IMMUTABLE_MEMTABLES: &str = "rocksdb.num-immutable-mem-table";
pub(crate) const LEVEL0_FILES: &str = "rocksdb.num-files-at-level0";
pub(crate) const MEMTABLE_BYTES: &str = "rocksdb.cur-size-all-mem-tables";

/// Read an integer property, treating a missing one as zero.
pub(crate) fn int_property(db: &Db, name: &str) -> Result<u64> {
    Ok(db.property_int_value(name).map_err(Error::engine)?.unwrap_or(0))
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Snapshot {
    pub super_version: u64,
    pub immutable_memtables: u64,
    pub level0_files: u64,
}

impl Snapshot {
    pub(crate) fn read(db: &Db) -> Result<Self> {
        Ok(Self {
            super_version: int_property(db, SUPER_VERSION)?,
            immutable_memtables: int_property(db, IMMUTABLE_MEMTABLES)?,
            level0_files: int_property(db, LEVEL0_FILES)?,
        })
    }
}

/// Event explaining the move from `previous` to `current`, if any.
pub(crate) fn classify(previous: &Snapshot, current: &Snapshot) -> Option<EngineEvent> {
    if current.super_version == previous.super_version {
        return None;
    }

    let event = if current.immutable_memtables > previous.immutable_memtables {
        // A memtable switch always starts a new WAL.
        EngineEvent::WalCreated
    } else if current.immutable_memtables < previous.immutable_memtables
        || current.level0_files > previous.level0_files
    {
        EngineEvent::FlushCompleted
    } else {
        EngineEvent::CompactionCompleted
    };
    Some(event)
}

/// Background sampler reporting lifecycle events to a listener.
pub(crate) struct EventPump {
    stop: Sender<()>,
    worker: JoinHandle<()>,
}

impl EventPump {
    pub(crate) fn start(
        db: Arc<Db>,
        listener: Arc<dyn EngineEventListener>,
        interval: Duration,
    ) -> Result<Self> {
        let (stop, stopped) = channel::bounded(1);
        let worker = thread::Builder::new()
            .name("raft-store-rocksdb-events".to_string())
            .spawn(move || run(&db, &*listener, &stopped, interval))
            .map_err(Error::Io)?;

        Ok(Self { stop, worker })
    }

    pub(crate) fn stop(self) {
        drop(self.stop);
        if self.worker.join().is_err() {
            error!("rocksdb event pump panicked");
        }
    }
}

fn run(db: &Db, listener: &dyn EngineEventListener, stopped: &Receiver<()>, interval: Duration) {
    debug!(?interval, "rocksdb event pump started");
    let mut previous = Snapshot::read(db).unwrap_or_default();

    while let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(interval) {
        let current = match Snapshot::read(db) {
            Ok(current) => current,
            Err(e) => {
                warn!("failed to read rocksdb properties: {e}");
                continue;
            }
        };

        if let Some(event) = classify(&previous, &current) {
            trace!(?event, ?current, "rocksdb lifecycle event");
            listener.on_event(event);
        }
        previous = current;
    }
    debug!("rocksdb event pump stopped");
}
