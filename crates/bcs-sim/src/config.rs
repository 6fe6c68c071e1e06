//! Simulation configuration.

use bcs_error::{BcsError, Result};
use bcs_lru::DEFAULT_MAX_EVICTION_ATTEMPTS;
use bcs_types::{BlockSize, DEFAULT_BLOCK_SIZE};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Seed of the victim-sampling RNG when none is configured.
pub const DEFAULT_SEED: u64 = 0x5EED_B10C_CAC4_E001;

/// Eviction strategy selected for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Exact,
    LowMemory,
}

impl Strategy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::LowMemory => "low_memory",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = BcsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "exact" => Ok(Self::Exact),
            "low_memory" | "low-memory" | "lowmem" => Ok(Self::LowMemory),
            other => Err(BcsError::InvalidConfig(format!(
                "unknown strategy {other:?} (expected exact or low_memory)"
            ))),
        }
    }
}

/// Parameters of one simulation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimConfig {
    /// Share of the trace's addressable blocks the cache holds, 0..=100.
    pub cache_percentage: u32,
    pub strategy: Strategy,
    /// Share of the low-memory cache kept in the evictable head bucket,
    /// 1..=100. Ignored by the exact strategy.
    pub low_memory_target_percentage: u32,
    /// Bytes per cached block. Must be a power of two.
    pub block_size: u32,
    /// Hash index bucket count. `None` uses one bucket per cached block.
    pub index_buckets: Option<usize>,
    pub seed: u64,
    pub max_eviction_attempts: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            cache_percentage: 10,
            strategy: Strategy::Exact,
            low_memory_target_percentage: 50,
            block_size: DEFAULT_BLOCK_SIZE,
            index_buckets: None,
            seed: DEFAULT_SEED,
            max_eviction_attempts: DEFAULT_MAX_EVICTION_ATTEMPTS,
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cache_percentage > 100 {
            return Err(BcsError::InvalidConfig(format!(
                "cache_percentage must be in 0..=100, got {}",
                self.cache_percentage
            )));
        }
        if !(1..=100).contains(&self.low_memory_target_percentage) {
            return Err(BcsError::InvalidConfig(format!(
                "low_memory_target_percentage must be in 1..=100, got {}",
                self.low_memory_target_percentage
            )));
        }
        self.block_size()?;
        if self.index_buckets == Some(0) {
            return Err(BcsError::InvalidConfig(
                "index_buckets must be > 0".to_owned(),
            ));
        }
        if self.max_eviction_attempts == 0 {
            return Err(BcsError::InvalidConfig(
                "max_eviction_attempts must be > 0".to_owned(),
            ));
        }
        Ok(())
    }

    pub fn block_size(&self) -> Result<BlockSize> {
        BlockSize::new(self.block_size).map_err(|err| {
            BcsError::InvalidConfig(format!("block_size {}: {err}", self.block_size))
        })
    }

    /// Cache capacity in blocks for a trace addressing `total_blocks` blocks.
    pub fn capacity_for(&self, total_blocks: u64) -> Result<usize> {
        let blocks = u128::from(total_blocks) * u128::from(self.cache_percentage) / 100;
        let capacity = usize::try_from(blocks).map_err(|_| {
            BcsError::InvalidConfig(format!("cache capacity {blocks} does not fit usize"))
        })?;
        if capacity == 0 {
            return Err(BcsError::InvalidConfig(format!(
                "{}% of {total_blocks} blocks is an empty cache",
                self.cache_percentage
            )));
        }
        Ok(capacity)
    }

    /// Bucket count for an index serving `capacity` blocks.
    #[must_use]
    pub fn index_buckets_for(&self, capacity: usize) -> usize {
        self.index_buckets.unwrap_or(capacity).max(1)
    }
}
