use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam::channel::{self, Receiver};
use proptest::prelude::*;
use proven_raft_store::{
    Durability, EntryCodec, Error, KvEngine, LogEntry, LogEntryType, LogStore, Pressure,
    PressureThresholds, StableStore, StoreOptions, keys,
};
use proven_raft_store_memory::{MemoryStore, open};

const WAIT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn store() -> MemoryStore {
    init_tracing();
    open(StoreOptions::default(), PressureThresholds::default()).unwrap()
}

fn entries(indices: impl IntoIterator<Item = u64>) -> Vec<LogEntry> {
    indices
        .into_iter()
        .map(|i| LogEntry::new(i, 1, format!("log{i}")))
        .collect()
}

/// Store whose busy callback reports into a channel, with small limits:
/// busy at 1945 memtable bytes or 3 level 0 files.
fn signalling_store() -> (MemoryStore, Receiver<bool>) {
    init_tracing();
    let (tx, rx) = channel::unbounded();
    let options = StoreOptions::default().with_busy_callback(move |busy| {
        let _ = tx.send(busy);
    });
    let thresholds = PressureThresholds {
        write_buffer_size: 1024,
        max_write_buffer_number: 2,
        level0_stop_writes_trigger: 4,
    };
    (open(options, thresholds).unwrap(), rx)
}

/// Wait until the callback reports `expected`, skipping older signals.
fn wait_for(rx: &Receiver<bool>, expected: bool) {
    let deadline = Instant::now() + WAIT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(busy) if busy == expected => return,
            Ok(_) => {}
            Err(e) => panic!("no busy={expected} signal: {e}"),
        }
    }
}

#[test]
fn test_empty_store_has_no_bounds() {
    let store = store();

    assert_eq!(store.first_index().unwrap(), None);
    assert_eq!(store.last_index().unwrap(), None);
    assert_eq!(store.bounds().unwrap(), None);
    // The consensus layer maps the empty condition to 0.
    assert_eq!(store.first_index().unwrap().unwrap_or(0), 0);
}

#[test]
fn test_append_and_read_back() {
    let store = store();
    store.append_entries(&entries(1..=3)).unwrap();

    assert_eq!(store.first_index().unwrap(), Some(1));
    assert_eq!(store.last_index().unwrap(), Some(3));
    assert_eq!(store.bounds().unwrap(), Some((1, 3)));

    let entry = store.get_entry(2).unwrap();
    assert_eq!(entry.index, 2);
    assert_eq!(entry.data, Bytes::from("log2"));
}

#[test]
fn test_single_append_round_trips() {
    let store = store();
    let entry = LogEntry::new(7, 3, "barrier")
        .with_type(LogEntryType::Barrier)
        .with_extensions(&b"ext"[..]);

    store.append_entry(&entry).unwrap();
    assert_eq!(store.get_entry(7).unwrap(), entry);

    // Overwriting an index replaces the entry.
    let replacement = LogEntry::new(7, 4, "noop").with_type(LogEntryType::Noop);
    store.append_entry(&replacement).unwrap();
    assert_eq!(store.get_entry(7).unwrap(), replacement);
}

#[test]
fn test_missing_entry_is_not_found() {
    let store = store();
    store.append_entries(&entries([1, 3])).unwrap();

    let err = store.get_entry(2).unwrap_err();
    assert!(matches!(err, Error::EntryNotFound(2)));
    assert!(err.is_not_found());
    assert!(!err.is_encoding());
}

#[test]
fn test_corrupt_entry_is_encoding_error() {
    let store = store();
    let engine = store.engine().unwrap();

    engine
        .put(&keys::log_key(1), b"\x07garbage", Durability::Buffered)
        .unwrap();
    let err = store.get_entry(1).unwrap_err();
    assert!(err.is_encoding());
    assert!(!err.is_not_found());

    // Well-formed entry stored under the wrong index.
    let misplaced = EntryCodec::default()
        .encode(&LogEntry::new(3, 1, "three"))
        .unwrap();
    engine
        .put(&keys::log_key(2), &misplaced, Durability::Buffered)
        .unwrap();
    assert!(store.get_entry(2).unwrap_err().is_encoding());
}

#[test]
fn test_get_entries_is_half_open() {
    let store = store();
    store.append_entries(&entries(1..=10)).unwrap();

    let read = store.get_entries(3, 6).unwrap();
    let indices: Vec<u64> = read.iter().map(|e| e.index).collect();
    assert_eq!(indices, vec![3, 4, 5]);

    assert!(store.get_entries(6, 6).unwrap().is_empty());
    assert!(store.get_entries(8, 2).unwrap().is_empty());
    assert_eq!(store.get_entries(9, u64::MAX).unwrap().len(), 2);
}

#[test]
fn test_large_log_bounds_and_reads() {
    let store = store();
    for chunk in entries(1..=1000).chunks(100) {
        store.append_entries(chunk).unwrap();
    }
    store.set_u64(b"term", 9).unwrap();

    assert_eq!(store.bounds().unwrap(), Some((1, 1000)));
    let read = store.get_entries(250, 750).unwrap();
    assert_eq!(read.len(), 500);
    assert!(read.windows(2).all(|pair| pair[0].index + 1 == pair[1].index));

    store.delete_range(1, 499).unwrap();
    store.delete_range(900, u64::MAX).unwrap();
    assert_eq!(store.bounds().unwrap(), Some((500, 899)));
}

#[test]
fn test_delete_range_prefix() {
    let store = store();
    store.append_entries(&entries(0..20)).unwrap();

    store.delete_range(0, 9).unwrap();

    for i in 0..=9 {
        assert!(store.get_entry(i).unwrap_err().is_not_found(), "entry {i}");
    }
    assert_eq!(store.get_entry(11).unwrap().data, Bytes::from("log11"));
    assert_eq!(store.bounds().unwrap(), Some((10, 19)));
}

#[test]
fn test_delete_range_keeps_neighbours() {
    let store = store();
    store.append_entries(&entries(1..=9)).unwrap();

    store.delete_range(4, 6).unwrap();

    assert!(store.get_entry(3).is_ok());
    assert!(store.get_entry(7).is_ok());
    for i in 4..=6 {
        assert!(store.get_entry(i).unwrap_err().is_not_found());
    }
}

#[test]
fn test_delete_range_inverted_is_noop() {
    let store = store();
    store.append_entries(&entries(1..=5)).unwrap();

    store.delete_range(4, 2).unwrap();

    assert_eq!(store.get_entries(1, 6).unwrap().len(), 5);
}

#[test]
fn test_delete_range_at_max_index() {
    let store = store();
    store
        .append_entries(&entries([0, 5, u64::MAX - 1, u64::MAX]))
        .unwrap();
    store.set_u64(b"term", 9).unwrap();

    store.delete_range(u64::MAX - 1, u64::MAX).unwrap();

    assert!(store.get_entry(u64::MAX).unwrap_err().is_not_found());
    assert!(store.get_entry(u64::MAX - 1).unwrap_err().is_not_found());
    assert_eq!(store.bounds().unwrap(), Some((0, 5)));
    assert_eq!(store.get_u64(b"term").unwrap(), 9);

    // Deleting the whole index space leaves metadata alone.
    store.delete_range(0, u64::MAX).unwrap();
    assert_eq!(store.bounds().unwrap(), None);
    assert_eq!(store.get_u64(b"term").unwrap(), 9);
}

#[test]
fn test_failed_encoding_leaves_batch_invisible() {
    init_tracing();
    let store = open(
        StoreOptions::default().with_max_entry_bytes(256),
        PressureThresholds::default(),
    )
    .unwrap();

    let mut batch = entries(1..=5);
    batch[2].data = Bytes::from(vec![7u8; 1024]);

    let err = store.append_entries(&batch).unwrap_err();
    assert!(err.is_encoding());

    assert_eq!(store.bounds().unwrap(), None);
    for i in 1..=5 {
        assert!(store.get_entry(i).unwrap_err().is_not_found());
    }
    assert!(store.engine().unwrap().is_empty());
}

#[test]
fn test_u64_metadata() {
    let store = store();

    store.set_u64(b"term", 111).unwrap();
    assert_eq!(store.get_u64(b"term").unwrap(), 111);

    let err = store.get_u64(b"missing").unwrap_err();
    assert!(matches!(&err, Error::MetadataKeyNotFound(key) if key.as_bytes() == b"missing"));
    assert!(err.is_not_found());
    assert_eq!(err.to_string(), "metadata key missing not found");
}

#[test]
fn test_metadata_bytes() {
    let store = store();

    store.set_metadata(b"vote", b"node-a").unwrap();
    assert_eq!(store.get_metadata(b"vote").unwrap(), Bytes::from("node-a"));

    store.set_metadata(b"vote", b"node-b").unwrap();
    assert_eq!(store.get_metadata(b"vote").unwrap(), Bytes::from("node-b"));

    // A malformed counter is an encoding error, not an absence.
    assert!(store.get_u64(b"vote").unwrap_err().is_encoding());
}

#[test]
fn test_namespaces_are_independent() {
    let store = store();
    // Metadata key bytes identical to a log key suffix.
    let suffix = 5u64.to_be_bytes();

    store.set_metadata(&suffix, b"meta").unwrap();
    assert_eq!(store.bounds().unwrap(), None);
    assert!(store.get_entry(5).unwrap_err().is_not_found());

    store.append_entry(&LogEntry::new(5, 1, "log")).unwrap();
    assert_eq!(store.get_metadata(&suffix).unwrap(), Bytes::from("meta"));
    assert_eq!(store.get_entry(5).unwrap().data, Bytes::from("log"));

    store.delete_range(0, u64::MAX).unwrap();
    assert_eq!(store.get_metadata(&suffix).unwrap(), Bytes::from("meta"));
}

#[test]
fn test_writes_use_configured_durability() {
    let store = store();
    assert_eq!(store.durability(), Durability::Buffered);

    store.append_entry(&LogEntry::new(1, 1, "a")).unwrap();
    let engine = store.engine().unwrap();
    assert_eq!(engine.last_durability(), Some(Durability::Buffered));

    store.sync().unwrap();
    assert_eq!(engine.sync_count(), 1);

    let synced = open(
        StoreOptions::default().with_durability(Durability::Synced),
        PressureThresholds::default(),
    )
    .unwrap();
    synced.set_u64(b"term", 1).unwrap();
    assert_eq!(
        synced.engine().unwrap().last_durability(),
        Some(Durability::Synced)
    );
}

#[test]
fn test_closed_store_fails_fast() {
    let store = store();
    store.append_entries(&entries(1..=3)).unwrap();
    let engine = store.engine().unwrap();

    store.close().unwrap();
    assert!(store.is_closed());
    assert!(engine.is_closed());

    assert!(matches!(store.first_index(), Err(Error::Closed)));
    assert!(matches!(store.get_entry(1), Err(Error::Closed)));
    assert!(matches!(
        store.append_entry(&LogEntry::new(4, 1, "late")),
        Err(Error::Closed)
    ));
    assert!(matches!(store.set_u64(b"term", 2), Err(Error::Closed)));
    assert!(matches!(store.sync(), Err(Error::Closed)));

    // Closing again is harmless.
    store.close().unwrap();
}

#[test]
fn test_concurrent_appends() {
    let store = store();

    thread::scope(|scope| {
        for worker in 0..4u64 {
            let store = &store;
            scope.spawn(move || {
                let start = worker * 100;
                for chunk in entries(start..start + 100).chunks(10) {
                    store.append_entries(chunk).unwrap();
                }
            });
        }
    });

    assert_eq!(store.bounds().unwrap(), Some((0, 399)));
    assert_eq!(store.get_entries(0, 400).unwrap().len(), 400);
}

#[test]
fn test_busy_when_memtable_nearly_full() {
    let (store, rx) = signalling_store();
    let engine = store.engine().unwrap();
    wait_for(&rx, false);
    assert_eq!(store.pressure(), Pressure::Calm);

    let big: Vec<LogEntry> = (1..=4)
        .map(|i| LogEntry::new(i, 1, vec![0u8; 600]))
        .collect();
    store.append_entries(&big).unwrap();
    engine.rotate_wal().unwrap();
    wait_for(&rx, true);
    assert_eq!(store.pressure(), Pressure::Busy);

    // The flush empties the memtable and leaves a single level 0 file.
    engine.flush().unwrap();
    wait_for(&rx, false);
    assert_eq!(store.pressure(), Pressure::Calm);
}

#[test]
fn test_calm_after_compaction() {
    let (store, rx) = signalling_store();
    let engine = store.engine().unwrap();

    for round in 0..3u64 {
        store
            .append_entries(&entries(round * 10..round * 10 + 5))
            .unwrap();
        engine.flush().unwrap();
    }
    wait_for(&rx, true);
    assert_eq!(engine.metrics().unwrap().level0_files, 3);

    engine.compact().unwrap();
    wait_for(&rx, false);
    assert_eq!(store.pressure(), Pressure::Calm);
}

#[test]
fn test_close_stops_busy_signal() {
    let (store, rx) = signalling_store();
    let engine = store.engine().unwrap();
    wait_for(&rx, false);

    store.close().unwrap();
    while rx.try_recv().is_ok() {}

    // The engine is closed too, so nothing can trigger an evaluation.
    assert!(engine.rotate_wal().is_err());
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn test_close_from_callback() {
    init_tracing();
    let (tx, rx) = channel::bounded(1);
    let slot: Arc<parking_lot::Mutex<Option<Arc<MemoryStore>>>> = Arc::default();
    let options = StoreOptions::default().with_busy_callback({
        let slot = Arc::clone(&slot);
        move |_| {
            if let Some(store) = slot.lock().take() {
                let _ = tx.send(store.close().is_ok());
            }
        }
    });

    let store = Arc::new(open(options, PressureThresholds::default()).unwrap());
    let engine = store.engine().unwrap();
    *slot.lock() = Some(Arc::clone(&store));
    // The evaluation forced on open may already have closed the store.
    let _ = engine.rotate_wal();

    assert_eq!(rx.recv_timeout(WAIT), Ok(true));
    assert!(store.is_closed());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_bounds_track_appended_indices(
        indices in prop::collection::btree_set(any::<u64>(), 1..40),
    ) {
        let store = store();
        prop_assert_eq!(store.bounds().unwrap(), None);

        let sorted: Vec<u64> = indices.iter().copied().collect();
        for chunk in entries(sorted.iter().copied()).chunks(7) {
            store.append_entries(chunk).unwrap();
        }

        prop_assert_eq!(store.first_index().unwrap(), sorted.first().copied());
        prop_assert_eq!(store.last_index().unwrap(), sorted.last().copied());
        for &i in &sorted {
            let entry = store.get_entry(i).unwrap();
            prop_assert_eq!(entry.index, i);
            prop_assert_eq!(entry.data, Bytes::from(format!("log{i}")));
        }
    }

    #[test]
    fn prop_delete_range_removes_exactly_the_range(
        indices in prop::collection::btree_set(0u64..200, 0..60),
        min in 0u64..200,
        len in 0u64..80,
    ) {
        let store = store();
        store.append_entries(&entries(indices.iter().copied())).unwrap();

        let max = min + len;
        store.delete_range(min, max).unwrap();

        let remaining: BTreeSet<u64> = store
            .get_entries(0, u64::MAX)
            .unwrap()
            .into_iter()
            .map(|e| e.index)
            .collect();
        let expected: BTreeSet<u64> = indices
            .iter()
            .copied()
            .filter(|i| *i < min || *i > max)
            .collect();
        prop_assert_eq!(remaining, expected);
        for i in min..=max {
            prop_assert!(store.get_entry(i).unwrap_err().is_not_found());
        }
    }
}
