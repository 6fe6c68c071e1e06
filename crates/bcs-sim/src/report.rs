//! End-of-run counters.

use serde::{Deserialize, Serialize};

/// Recoverable conditions the simulator counted instead of aborting on.
///
/// A correct run reports all zeros.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anomalies {
    /// Index inserts that found the key already present; rolled back.
    pub duplicate_inserts: u64,
    /// Victims the policy named that were not in the index.
    pub missing_victims: u64,
    /// Misses admitted without evicting because no victim was found.
    pub eviction_search_failures: u64,
}

impl Anomalies {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.duplicate_inserts + self.missing_victims + self.eviction_search_failures
    }
}

/// Snapshot of a simulator's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimReport {
    pub strategy: String,
    pub capacity: usize,
    /// Requests passed to `process`.
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
    /// Blocks in the index at report time.
    pub resident: usize,
    pub evictions: u64,
    pub anomalies: Anomalies,
    /// Recency metadata held by the eviction policy.
    pub policy_metadata_bytes: usize,
}

impl SimReport {
    #[must_use]
    pub fn accesses(&self) -> u64 {
        self.hits + self.misses
    }

    /// Fraction of block accesses that hit, 0.0 before any access.
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.accesses();
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// `cache_percentage, hits misses resident`.
    #[must_use]
    pub fn summary_line(&self, cache_percentage: u32) -> String {
        format!(
            "{cache_percentage}, {} {} {}",
            self.hits, self.misses, self.resident
        )
    }
}
