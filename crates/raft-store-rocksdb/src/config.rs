//! RocksDB configuration

use std::fmt::{Debug, Formatter};
use std::path::PathBuf;
use std::time::Duration;

use proven_raft_store::{Error, PressureThresholds, Result, StoreOptions, TuningProfile};
use rocksdb::{BlockBasedOptions, Cache, DBCompressionType, Options};
use tracing::debug;

/// How often engine properties are sampled for lifecycle events.
pub const DEFAULT_EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Where the RocksDB options come from. Resolved once when the store opens.
#[derive(Clone)]
pub enum EngineOptions {
    /// Derive the options from a tuning profile.
    Profile(TuningProfile),

    /// Use caller-built options as they are. The busy signal has no profile
    /// to derive its limits from, so they are given explicitly.
    Custom {
        /// Options handed to RocksDB.
        options: Options,
        /// Limits the busy signal is measured against.
        thresholds: PressureThresholds,
    },
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::Profile(TuningProfile::default())
    }
}

impl Debug for EngineOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Profile(profile) => f.debug_tuple("Profile").field(profile).finish(),
            Self::Custom { thresholds, .. } => f
                .debug_struct("Custom")
                .field("thresholds", thresholds)
                .finish_non_exhaustive(),
        }
    }
}

/// Configuration for the RocksDB backed raft store
#[derive(Clone, Debug)]
pub struct RocksDbConfig {
    /// Directory holding the database
    pub path: PathBuf,

    /// Separate directory for the write-ahead log
    pub wal_dir: Option<PathBuf>,

    /// Engine tuning
    pub engine: EngineOptions,

    /// How often engine properties are sampled for lifecycle events
    pub event_poll_interval: Duration,

    /// Engine-independent store options
    pub store: StoreOptions,
}

impl RocksDbConfig {
    /// Create a new configuration with the given path and the default
    /// profile
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            wal_dir: None,
            engine: EngineOptions::default(),
            event_poll_interval: DEFAULT_EVENT_POLL_INTERVAL,
            store: StoreOptions::default(),
        }
    }

    /// Keep the write-ahead log in `wal_dir`.
    #[must_use]
    pub fn with_wal_dir(mut self, wal_dir: impl Into<PathBuf>) -> Self {
        self.wal_dir = Some(wal_dir.into());
        self
    }

    /// Tune the engine from `profile`.
    #[must_use]
    pub fn with_profile(mut self, profile: TuningProfile) -> Self {
        self.engine = EngineOptions::Profile(profile);
        self
    }

    /// Bypass tuning profiles and open RocksDB with `options`.
    #[must_use]
    pub fn with_custom_options(mut self, options: Options, thresholds: PressureThresholds) -> Self {
        self.engine = EngineOptions::Custom {
            options,
            thresholds,
        };
        self
    }

    /// Sample engine properties every `interval`.
    #[must_use]
    pub const fn with_event_poll_interval(mut self, interval: Duration) -> Self {
        self.event_poll_interval = interval;
        self
    }

    /// Set the engine-independent store options.
    #[must_use]
    pub fn with_store_options(mut self, store: StoreOptions) -> Self {
        self.store = store;
        self
    }

    /// Options to open RocksDB with and the thresholds of the busy signal.
    pub(crate) fn resolve(&self) -> Result<(Options, PressureThresholds)> {
        let (mut options, thresholds) = match &self.engine {
            EngineOptions::Profile(profile) => {
                (profile_options(profile)?, profile.pressure_thresholds())
            }
            EngineOptions::Custom {
                options,
                thresholds,
            } => (options.clone(), *thresholds),
        };

        if let Some(wal_dir) = &self.wal_dir {
            options.set_wal_dir(wal_dir);
        }

        Ok((options, thresholds))
    }
}

/// Translate a tuning profile into RocksDB options.
pub fn profile_options(profile: &TuningProfile) -> Result<Options> {
    profile.validate()?;

    let mut options = Options::default();
    options.create_if_missing(true);

    options.set_write_buffer_size(to_usize("write_buffer_size", profile.write_buffer_size)?);
    options.set_max_write_buffer_number(to_c_int(
        "max_write_buffer_number",
        profile.max_write_buffer_number,
    )?);

    options.set_level_zero_file_num_compaction_trigger(to_c_int(
        "level0_file_num_compaction_trigger",
        profile.level0_file_num_compaction_trigger,
    )?);
    options.set_level_zero_slowdown_writes_trigger(to_c_int(
        "level0_slowdown_writes_trigger",
        profile.level0_slowdown_writes_trigger,
    )?);
    options.set_level_zero_stop_writes_trigger(to_c_int(
        "level0_stop_writes_trigger",
        profile.level0_stop_writes_trigger,
    )?);

    options.set_max_bytes_for_level_base(profile.max_bytes_for_level_base);
    #[allow(clippy::cast_precision_loss)]
    let level_multiplier = profile.max_bytes_for_level_multiplier as f64;
    options.set_max_bytes_for_level_multiplier(level_multiplier);
    options.set_target_file_size_base(profile.target_file_size_base);
    options.set_target_file_size_multiplier(to_c_int(
        "target_file_size_multiplier",
        profile.target_file_size_multiplier,
    )?);
    options.set_level_compaction_dynamic_level_bytes(profile.level_compaction_dynamic_level_bytes);

    let levels = profile.level_tuning();
    options.set_num_levels(to_c_int("num_levels", profile.num_levels)?);
    for level in &levels {
        debug!(
            level = level.level,
            target_file_size = level.target_file_size,
            block_size = level.block_size,
            "level tuning"
        );
    }

    // Raft entries are written once and mostly read back soon after, so no
    // level is compressed.
    options.set_compression_type(DBCompressionType::None);
    options.set_compression_per_level(&vec![DBCompressionType::None; levels.len()]);

    let mut table = BlockBasedOptions::default();
    table.set_block_size(to_usize("block_size", profile.block_size)?);
    if profile.lru_cache_size > 0 {
        let cache = Cache::new_lru_cache(to_usize("lru_cache_size", profile.lru_cache_size)?);
        table.set_block_cache(&cache);
    } else {
        table.disable_cache();
    }
    options.set_block_based_table_factory(&table);

    options.set_max_background_jobs(to_c_int(
        "max_background_jobs",
        profile.max_background_compactions + profile.max_background_flushes,
    )?);
    options.set_keep_log_file_num(to_usize("keep_log_file_num", profile.keep_log_file_num)?);
    options.set_recycle_log_file_num(to_usize(
        "recycle_log_file_num",
        profile.recycle_log_file_num,
    )?);
    options.set_max_manifest_file_size(to_usize(
        "max_manifest_file_size",
        profile.max_manifest_file_size,
    )?);

    Ok(options)
}

fn to_c_int(name: &str, value: u64) -> Result<i32> {
    i32::try_from(value).map_err(|_| Error::Config(format!("{name} {value} is out of range")))
}

fn to_usize(name: &str, value: u64) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::Config(format!("{name} {value} is out of range")))
}
