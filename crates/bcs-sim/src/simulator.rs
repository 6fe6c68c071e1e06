//! The access loop: index lookup, then bump on hit or admit on miss.

use crate::report::{Anomalies, SimReport};
use bcs_error::{BcsError, Result};
use bcs_index::{HashIndex, KeyHasher, ModuloHasher};
use bcs_lru::{Eviction, EvictionPolicy};
use bcs_types::{BlockSize, CacheKey};
use rand::Rng;
use rand::rngs::StdRng;
use tracing::{info, warn};

/// Outcome of one block access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Hit,
    Miss,
}

/// Replays block accesses against a fixed-capacity cache.
///
/// The index and the policy jointly own every cached block: a key is in the
/// index exactly when the policy accounts for it.
#[derive(Debug)]
pub struct TraceSimulator<P: EvictionPolicy, H = ModuloHasher, R = StdRng> {
    index: HashIndex<P::Entry, H>,
    policy: P,
    rng: R,
    block_size: BlockSize,
    requests: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    anomalies: Anomalies,
}

impl<P: EvictionPolicy, R: Rng> TraceSimulator<P, ModuloHasher, R> {
    /// Simulator whose index places `key` in bucket `key mod num_buckets`.
    pub fn new(policy: P, num_buckets: usize, rng: R) -> Result<Self> {
        Self::with_hasher(policy, num_buckets, ModuloHasher, rng)
    }
}

impl<P, H, R> TraceSimulator<P, H, R>
where
    P: EvictionPolicy,
    H: KeyHasher,
    R: Rng,
{
    pub fn with_hasher(policy: P, num_buckets: usize, hasher: H, rng: R) -> Result<Self> {
        let capacity = policy.capacity();
        let index = HashIndex::with_entry_capacity(num_buckets, hasher, capacity)?;
        info!(
            strategy = policy.name(),
            capacity,
            num_buckets,
            "trace_simulator: initialized"
        );
        Ok(Self {
            index,
            policy,
            rng,
            block_size: BlockSize::DEFAULT,
            requests: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            anomalies: Anomalies::default(),
        })
    }

    #[must_use]
    pub fn with_block_size(mut self, block_size: BlockSize) -> Self {
        self.block_size = block_size;
        self
    }

    #[must_use]
    pub fn block_size(&self) -> BlockSize {
        self.block_size
    }

    #[must_use]
    pub fn index(&self) -> &HashIndex<P::Entry, H> {
        &self.index
    }

    #[must_use]
    pub fn policy(&self) -> &P {
        &self.policy
    }

    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits
    }

    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses
    }

    #[must_use]
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    #[must_use]
    pub fn anomalies(&self) -> Anomalies {
        self.anomalies
    }

    /// Touch every whole block of a request `byte_length` bytes long
    /// starting at `block_start`. Returns the number of blocks touched.
    pub fn process(&mut self, block_start: u64, byte_length: u64) -> Result<u64> {
        self.requests += 1;
        let blocks = self.block_size.whole_blocks(byte_length);
        if blocks == 0 {
            return Ok(0);
        }
        let start = CacheKey(block_start);
        if start.checked_add(blocks - 1).is_none() {
            return Err(BcsError::Trace {
                record: self.requests,
                detail: format!("{blocks} blocks from block {block_start} overflow the key space"),
            });
        }
        for offset in 0..blocks {
            // In range: the last key was checked above.
            self.access(CacheKey(block_start + offset))?;
        }
        Ok(blocks)
    }

    /// Look up one block, bumping it on a hit and admitting it on a miss.
    pub fn access(&mut self, key: CacheKey) -> Result<Access> {
        if let Some(entry) = self.index.lookup_mut(key) {
            self.hits += 1;
            self.policy.bump(key, entry)?;
            return Ok(Access::Hit);
        }

        self.misses += 1;
        let admission = self.policy.insert(key, &self.index, &mut self.rng)?;
        match admission.eviction {
            Eviction::NotNeeded => {}
            Eviction::Evicted(victim) => {
                self.remove_victim(victim)?;
                self.repay_overshoot()?;
            }
            Eviction::Failed(err) => self.record_anomaly(err)?,
        }

        if let Err(err) = self.index.insert(key, admission.entry) {
            self.policy.discard(key, admission.entry)?;
            self.record_anomaly(err)?;
        }
        Ok(Access::Miss)
    }

    fn remove_victim(&mut self, victim: CacheKey) -> Result<()> {
        self.evictions += 1;
        if let Err(err) = self.index.delete(victim) {
            self.record_anomaly(err)?;
        }
        Ok(())
    }

    /// Evict until the policy is back within capacity after an earlier
    /// failed victim search admitted a block over capacity.
    fn repay_overshoot(&mut self) -> Result<()> {
        while self.policy.resident() > self.policy.capacity() {
            match self.policy.reclaim(&self.index, &mut self.rng) {
                Eviction::NotNeeded => break,
                Eviction::Evicted(victim) => self.remove_victim(victim)?,
                Eviction::Failed(err) => {
                    self.record_anomaly(err)?;
                    break;
                }
            }
        }
        Ok(())
    }

    /// Count a recoverable error; hand fatal ones back to the caller.
    fn record_anomaly(&mut self, err: BcsError) -> Result<()> {
        if err.is_fatal() {
            return Err(err);
        }
        match err {
            BcsError::DuplicateKey { key } => {
                self.anomalies.duplicate_inserts += 1;
                warn!(block = key, "trace_simulator: duplicate insert rolled back");
            }
            BcsError::NotFound { key } => {
                self.anomalies.missing_victims += 1;
                warn!(block = key, "trace_simulator: evicted block was not indexed");
            }
            BcsError::EvictionSearchExhausted { attempts, floor } => {
                self.anomalies.eviction_search_failures += 1;
                warn!(
                    attempts,
                    floor,
                    resident = self.policy.resident(),
                    capacity = self.policy.capacity(),
                    "trace_simulator: no victim found, cache over capacity"
                );
            }
            other => return Err(other),
        }
        Ok(())
    }

    #[must_use]
    pub fn report(&self) -> SimReport {
        SimReport {
            strategy: self.policy.name().to_owned(),
            capacity: self.policy.capacity(),
            requests: self.requests,
            hits: self.hits,
            misses: self.misses,
            resident: self.index.len(),
            evictions: self.evictions,
            anomalies: self.anomalies,
            policy_metadata_bytes: self.policy.metadata_bytes(),
        }
    }
}
