//! Tuning profiles and store options

use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::DEFAULT_MAX_ENTRY_BYTES;
use crate::engine::{Durability, EngineMetrics};
use crate::{Error, Result};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// Only profile layout understood by this version.
pub const TUNING_PROFILE_VERSION: u32 = 1;

/// Memory budget presets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryBudget {
    /// Up to about 256 MiB.
    Tiny,
    /// Up to about 1 GiB.
    Small,
    /// Up to about 4 GiB.
    Medium,
    /// Up to about 8 GiB.
    #[default]
    Large,
}

/// Engine tuning, read once when the store is opened.
///
/// Changing tuning requires closing the store and opening it again with a
/// new profile.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningProfile {
    /// Layout version of this profile.
    pub version: u32,

    /// Size of a single memtable in bytes.
    pub write_buffer_size: u64,

    /// Memtables held in memory before writes stall.
    pub max_write_buffer_number: u64,

    /// Level 0 file count that triggers compaction.
    pub level0_file_num_compaction_trigger: u64,

    /// Level 0 file count at which writes are slowed down.
    pub level0_slowdown_writes_trigger: u64,

    /// Level 0 file count at which writes stop.
    pub level0_stop_writes_trigger: u64,

    /// Target size of level 1 in bytes.
    pub max_bytes_for_level_base: u64,

    /// Growth factor between level targets.
    pub max_bytes_for_level_multiplier: u64,

    /// Target SST file size at level 1.
    pub target_file_size_base: u64,

    /// Growth factor of the target file size per level.
    pub target_file_size_multiplier: u64,

    /// Number of LSM levels.
    pub num_levels: u64,

    /// Data block size in bytes.
    pub block_size: u64,

    /// Block cache size in bytes. Zero disables the cache.
    pub lru_cache_size: u64,

    /// Concurrent background compactions.
    pub max_background_compactions: u64,

    /// Concurrent background flushes.
    pub max_background_flushes: u64,

    /// Info log files to keep.
    pub keep_log_file_num: u64,

    /// WAL files to recycle instead of deleting.
    pub recycle_log_file_num: u64,

    /// Let the engine pick level targets dynamically.
    pub level_compaction_dynamic_level_bytes: bool,

    /// Manifest size at which it is rolled over.
    pub max_manifest_file_size: u64,
}

impl Default for TuningProfile {
    fn default() -> Self {
        Self::large()
    }
}

impl TuningProfile {
    /// Preset for the given memory budget.
    #[must_use]
    pub fn preset(budget: MemoryBudget) -> Self {
        match budget {
            MemoryBudget::Tiny => Self::tiny(),
            MemoryBudget::Small => Self::small(),
            MemoryBudget::Medium => Self::medium(),
            MemoryBudget::Large => Self::large(),
        }
    }

    /// Minimal memory usage, up to about 256 MiB.
    #[must_use]
    pub fn tiny() -> Self {
        Self {
            write_buffer_size: 4 * MIB,
            max_write_buffer_number: 4,
            ..Self::base()
        }
    }

    /// Low memory usage, up to about 1 GiB.
    #[must_use]
    pub fn small() -> Self {
        Self {
            write_buffer_size: 16 * MIB,
            max_write_buffer_number: 4,
            ..Self::base()
        }
    }

    /// Medium memory usage, up to about 4 GiB.
    #[must_use]
    pub fn medium() -> Self {
        Self {
            write_buffer_size: 64 * MIB,
            max_write_buffer_number: 4,
            ..Self::base()
        }
    }

    /// Large memory usage for good I/O performance, up to about 8 GiB.
    /// This is the default.
    #[must_use]
    pub fn large() -> Self {
        Self::base()
    }

    const fn base() -> Self {
        Self {
            version: TUNING_PROFILE_VERSION,
            write_buffer_size: 128 * MIB,
            max_write_buffer_number: 4,
            level0_file_num_compaction_trigger: 8,
            level0_slowdown_writes_trigger: 17,
            level0_stop_writes_trigger: 24,
            max_bytes_for_level_base: 4 * GIB,
            max_bytes_for_level_multiplier: 2,
            target_file_size_base: 16 * MIB,
            target_file_size_multiplier: 2,
            num_levels: 7,
            block_size: 32 * KIB,
            lru_cache_size: 0,
            max_background_compactions: 2,
            max_background_flushes: 2,
            keep_log_file_num: 16,
            recycle_log_file_num: 0,
            level_compaction_dynamic_level_bytes: false,
            max_manifest_file_size: 128 * MIB,
        }
    }

    /// Upper bound of memtable memory in MiB.
    #[must_use]
    pub const fn memory_size_mb(&self) -> u64 {
        self.write_buffer_size.saturating_mul(self.max_write_buffer_number) / MIB
    }

    /// Check the profile before handing it to an engine.
    pub fn validate(&self) -> Result<()> {
        if self.version != TUNING_PROFILE_VERSION {
            return Err(Error::Config(format!(
                "unsupported tuning profile version {}, expected {TUNING_PROFILE_VERSION}",
                self.version
            )));
        }

        let non_zero = [
            ("write_buffer_size", self.write_buffer_size),
            ("num_levels", self.num_levels),
            ("block_size", self.block_size),
            ("target_file_size_base", self.target_file_size_base),
            ("target_file_size_multiplier", self.target_file_size_multiplier),
            ("max_bytes_for_level_base", self.max_bytes_for_level_base),
            ("max_bytes_for_level_multiplier", self.max_bytes_for_level_multiplier),
            ("level0_stop_writes_trigger", self.level0_stop_writes_trigger),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return Err(Error::Config(format!("{name} must be greater than zero")));
        }

        if self.max_write_buffer_number < 2 {
            return Err(Error::Config(
                "max_write_buffer_number must be at least 2".to_string(),
            ));
        }

        if self.level0_file_num_compaction_trigger > self.level0_slowdown_writes_trigger
            || self.level0_slowdown_writes_trigger > self.level0_stop_writes_trigger
        {
            return Err(Error::Config(format!(
                "level 0 triggers must be ordered compaction <= slowdown <= stop, got {} / {} / {}",
                self.level0_file_num_compaction_trigger,
                self.level0_slowdown_writes_trigger,
                self.level0_stop_writes_trigger
            )));
        }

        Ok(())
    }

    /// Per-level file size and block size, level 0 first. The target file
    /// size grows by `target_file_size_multiplier` from one level to the
    /// next.
    #[must_use]
    pub fn level_tuning(&self) -> Vec<LevelTuning> {
        let mut target_file_size = self.target_file_size_base;
        (0..self.num_levels)
            .map(|level| {
                let tuning = LevelTuning {
                    level,
                    target_file_size,
                    block_size: self.block_size,
                };
                target_file_size =
                    target_file_size.saturating_mul(self.target_file_size_multiplier);
                tuning
            })
            .collect()
    }

    /// Thresholds at which the store reports write pressure.
    #[must_use]
    pub const fn pressure_thresholds(&self) -> PressureThresholds {
        PressureThresholds {
            write_buffer_size: self.write_buffer_size,
            max_write_buffer_number: self.max_write_buffer_number,
            level0_stop_writes_trigger: self.level0_stop_writes_trigger,
        }
    }
}

/// Derived tuning of one LSM level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelTuning {
    /// Level number, 0 being the youngest.
    pub level: u64,
    /// Target SST file size in bytes.
    pub target_file_size: u64,
    /// Data block size in bytes.
    pub block_size: u64,
}

/// Engine limits the busy signal is measured against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PressureThresholds {
    /// Size of a single memtable in bytes.
    pub write_buffer_size: u64,
    /// Memtables held in memory before writes stall.
    pub max_write_buffer_number: u64,
    /// Level 0 file count at which the engine stops writes.
    pub level0_stop_writes_trigger: u64,
}

impl Default for PressureThresholds {
    fn default() -> Self {
        TuningProfile::default().pressure_thresholds()
    }
}

impl PressureThresholds {
    /// Memtable bytes at which the store reports busy: 95% of the memtable
    /// budget.
    #[must_use]
    pub const fn memtable_limit(&self) -> u64 {
        self.write_buffer_size
            .saturating_mul(self.max_write_buffer_number)
            .saturating_mul(19)
            / 20
    }

    /// Level 0 file count at which the store reports busy: one below the
    /// engine's own stop trigger.
    #[must_use]
    pub const fn level0_limit(&self) -> u64 {
        self.level0_stop_writes_trigger.saturating_sub(1)
    }

    /// Whether `metrics` are close enough to the engine's limits to report
    /// busy.
    #[must_use]
    pub const fn is_busy(&self, metrics: &EngineMetrics) -> bool {
        metrics.memtable_bytes >= self.memtable_limit()
            || metrics.level0_files >= self.level0_limit()
    }
}

/// Callback receiving the busy signal. Invoked on the monitor's worker
/// thread, never on the write path.
pub type BusyCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Engine-independent store options.
#[derive(Clone)]
pub struct StoreOptions {
    /// Durability applied to every mutating call.
    pub durability: Durability,

    /// Largest encoded log entry accepted on write.
    pub max_entry_bytes: usize,

    /// Receiver of the busy signal.
    pub busy_callback: Option<BusyCallback>,

    /// How long `close` waits for an in-flight callback.
    pub shutdown_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            durability: Durability::Buffered,
            max_entry_bytes: DEFAULT_MAX_ENTRY_BYTES,
            busy_callback: None,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl StoreOptions {
    /// Set the write durability.
    #[must_use]
    pub const fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }

    /// Set the largest encoded entry.
    #[must_use]
    pub const fn with_max_entry_bytes(mut self, max_entry_bytes: usize) -> Self {
        self.max_entry_bytes = max_entry_bytes;
        self
    }

    /// Register the busy-signal callback.
    #[must_use]
    pub fn with_busy_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.busy_callback = Some(Arc::new(callback));
        self
    }

    /// Set how long `close` waits for the monitor worker.
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

impl Debug for StoreOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreOptions")
            .field("durability", &self.durability)
            .field("max_entry_bytes", &self.max_entry_bytes)
            .field("busy_callback", &self.busy_callback.is_some())
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish()
    }
}
