#![forbid(unsafe_code)]
//! Eviction policies for the block cache simulator.
//!
//! Two recency trackers share one contract, [`EvictionPolicy`]:
//!
//! - [`ExactLru`]: intrusive doubly linked list in an index arena. Strict
//!   recency order, one link pair per cached block.
//! - [`LowMemLru`]: generation-stamped approximate LRU. Per-block metadata is
//!   a single generation number; ordering state is a short chain of tag
//!   buckets whose length depends on the number of live generations, not on
//!   the number of cached blocks.
//!
//! A policy never owns the key -> entry mapping. The caller keeps that in a
//! hash index and hands the policy a [`ResidentSampler`] view when it needs to
//! pick a victim, plus the entry value on every hit.

mod exact;
mod lowmem;

pub use exact::{ExactLru, LruHandle};
pub use lowmem::{DEFAULT_MAX_EVICTION_ATTEMPTS, LowMemEntry, LowMemLru, TagBucket};

use bcs_error::{BcsError, Result};
use bcs_index::ResidentSampler;
use bcs_types::CacheKey;
use rand::Rng;
use std::fmt;

/// Outcome of making room for a newly admitted block.
#[derive(Debug)]
pub enum Eviction {
    /// The cache had room; nothing was evicted.
    NotNeeded,
    /// `key` was evicted and must be removed from the caller's index.
    Evicted(CacheKey),
    /// No victim could be chosen. The new block is still admitted, so the
    /// cache holds more blocks than its capacity until
    /// [`EvictionPolicy::reclaim`] pays the overshoot back.
    Failed(BcsError),
}

impl Eviction {
    #[must_use]
    pub fn victim(&self) -> Option<CacheKey> {
        match self {
            Self::Evicted(key) => Some(*key),
            Self::NotNeeded | Self::Failed(_) => None,
        }
    }
}

/// A block admitted by [`EvictionPolicy::insert`].
#[derive(Debug)]
pub struct Admission<E> {
    /// Handle to store in the caller's index under the new key.
    pub entry: E,
    pub eviction: Eviction,
}

/// Recency tracking and victim selection for a fixed-capacity block cache.
pub trait EvictionPolicy {
    /// Per-block value the caller stores in its index.
    type Entry: Copy + fmt::Debug;

    /// Short name used in reports and logs.
    fn name(&self) -> &'static str;

    /// Maximum number of resident blocks.
    fn capacity(&self) -> usize;

    /// Number of blocks the policy currently accounts for.
    fn resident(&self) -> usize;

    /// Admit `key` as the most recent block, evicting one block if the cache
    /// is full. `residents` is the caller's index *before* `key` is added.
    fn insert<S, R>(
        &mut self,
        key: CacheKey,
        residents: &S,
        rng: &mut R,
    ) -> Result<Admission<Self::Entry>>
    where
        S: ResidentSampler<Self::Entry> + ?Sized,
        R: Rng;

    /// Record a hit on `key`, whose index entry is `entry`.
    fn bump(&mut self, key: CacheKey, entry: &mut Self::Entry) -> Result<()>;

    /// Evict one block if an earlier failed search left the policy over
    /// capacity. `residents` must no longer contain victims already returned.
    fn reclaim<S, R>(&mut self, _residents: &S, _rng: &mut R) -> Eviction
    where
        S: ResidentSampler<Self::Entry> + ?Sized,
        R: Rng,
    {
        Eviction::NotNeeded
    }

    /// Forget an admitted block without it having been chosen as a victim.
    fn discard(&mut self, key: CacheKey, entry: Self::Entry) -> Result<()>;

    /// Bytes of recency metadata held by the policy itself.
    fn metadata_bytes(&self) -> usize;
}
