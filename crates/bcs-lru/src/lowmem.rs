//! Approximate LRU with one generation number per block.
//!
//! Every admission or hit stamps the block with the open generation. Once
//! `bump_threshold` stamps have landed in the open generation it is closed
//! into a [`TagBucket`] and a new generation opens. The closed buckets form a
//! chain from oldest (head) to newest (tail); bucket `b` accounts for every
//! live block whose generation lies in `(prev.generation_id, b.generation_id]`
//! and the head accounts for everything up to its own id.
//!
//! Buckets are kept few by two merge rules applied when a bucket loses a
//! block:
//!
//! - the head is retired into its successor once it holds fewer than
//!   `retained_blocks_target` blocks, which advances the eviction floor. A
//!   head that drops below the target while it is the only bucket retires as
//!   soon as the next generation closes, and an empty head never stays at the
//!   front of the chain;
//! - any other bucket absorbs its successor once the pair holds fewer than
//!   `bump_threshold` blocks.
//!
//! Victims are found by sampling resident blocks uniformly and accepting the
//! first whose generation is at or below the floor (the head's id). The search
//! gives up after a bounded number of draws.
//!
//! Live counts are exact: the bucket counts plus the open generation's count
//! always equal the number of blocks the policy has admitted and not yet
//! evicted or discarded.

use crate::{Admission, Eviction, EvictionPolicy};
use bcs_error::{BcsError, Result};
use bcs_index::ResidentSampler;
use bcs_types::{CacheKey, Generation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::mem;
use tracing::{debug, trace};

/// Victim draws per eviction before giving up.
pub const DEFAULT_MAX_EVICTION_ATTEMPTS: u32 = 1000;

/// Index entry of a block tracked by [`LowMemLru`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LowMemEntry {
    generation: Generation,
}

impl LowMemEntry {
    #[must_use]
    pub fn generation(self) -> Generation {
        self.generation
    }
}

/// Snapshot of one closed generation range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagBucket {
    /// Newest generation the bucket accounts for.
    pub generation_id: Generation,
    /// Live blocks stamped with a generation in the bucket's range.
    pub live_count: u64,
}

#[derive(Debug, Clone, Copy)]
struct TagSlot {
    bucket: TagBucket,
    next: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct LowMemLru {
    capacity: usize,
    retained_blocks_target: u64,
    bump_threshold: u64,
    max_eviction_attempts: u32,

    /// Open generation; stamps go here.
    global_generation: Generation,
    /// Stamps issued into the open generation.
    io_counter: u64,
    /// Live blocks stamped with the open generation.
    open_live: u64,
    blocks_present: usize,
    /// The head fell below the retained target with no successor to fold into.
    head_retire_pending: bool,

    tags: Vec<Option<TagSlot>>,
    free_tags: Vec<u32>,
    head: Option<u32>,
    tail: Option<u32>,
    tag_count: usize,
}

impl LowMemLru {
    /// Approximate LRU over `capacity` blocks that aims to keep the oldest
    /// `target_percentage` percent of them in the evictable head bucket.
    pub fn new(target_percentage: u32, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(BcsError::InvalidConfig(
                "low-memory lru capacity must be at least one block".to_owned(),
            ));
        }
        if !(1..=100).contains(&target_percentage) {
            return Err(BcsError::InvalidConfig(format!(
                "low-memory target percentage {target_percentage} is outside 1..=100"
            )));
        }
        let retained = u128::from(target_percentage) * capacity as u128 / 100;
        let retained_blocks_target = u64::try_from(retained).unwrap_or(u64::MAX).max(1);
        let bump_threshold = (retained_blocks_target / 2).max(1);

        debug!(
            capacity,
            target_percentage,
            retained_blocks_target,
            bump_threshold,
            "lowmem_lru: initialized"
        );
        Ok(Self {
            capacity,
            retained_blocks_target,
            bump_threshold,
            max_eviction_attempts: DEFAULT_MAX_EVICTION_ATTEMPTS,
            global_generation: Generation::ZERO,
            io_counter: 0,
            open_live: 0,
            blocks_present: 0,
            head_retire_pending: false,
            tags: Vec::new(),
            free_tags: Vec::new(),
            head: None,
            tail: None,
            tag_count: 0,
        })
    }

    /// Override the number of victim draws per eviction (at least one).
    #[must_use]
    pub fn with_max_eviction_attempts(mut self, attempts: u32) -> Self {
        self.max_eviction_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn bump_threshold(&self) -> u64 {
        self.bump_threshold
    }

    #[must_use]
    pub fn retained_blocks_target(&self) -> u64 {
        self.retained_blocks_target
    }

    #[must_use]
    pub fn max_eviction_attempts(&self) -> u32 {
        self.max_eviction_attempts
    }

    #[must_use]
    pub fn global_generation(&self) -> Generation {
        self.global_generation
    }

    #[must_use]
    pub fn blocks_present(&self) -> usize {
        self.blocks_present
    }

    /// Live blocks stamped with the open generation.
    #[must_use]
    pub fn open_live(&self) -> u64 {
        self.open_live
    }

    #[must_use]
    pub fn tag_bucket_count(&self) -> usize {
        self.tag_count
    }

    /// Highest generation that is currently evictable, `None` before the
    /// first generation closes.
    #[must_use]
    pub fn oldest_retained_generation(&self) -> Option<Generation> {
        self.head
            .and_then(|idx| self.slot(idx))
            .map(|slot| slot.bucket.generation_id)
    }

    /// Closed buckets from oldest to newest.
    #[must_use]
    pub fn tag_buckets(&self) -> Vec<TagBucket> {
        self.chain().map(|(_, slot)| slot.bucket).collect()
    }

    /// Sum of all bucket counts plus the open generation's count.
    #[must_use]
    pub fn tracked_blocks(&self) -> u64 {
        self.chain()
            .map(|(_, slot)| slot.bucket.live_count)
            .sum::<u64>()
            + self.open_live
    }

    fn slot(&self, idx: u32) -> Option<&TagSlot> {
        self.tags.get(idx as usize).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, idx: u32) -> Option<&mut TagSlot> {
        self.tags.get_mut(idx as usize).and_then(Option::as_mut)
    }

    fn chain(&self) -> impl Iterator<Item = (u32, &TagSlot)> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let idx = cursor?;
            let slot = self.slot(idx)?;
            cursor = slot.next;
            Some((idx, slot))
        })
    }

    fn alloc_tag(&mut self, slot: TagSlot) -> Result<u32> {
        if let Some(idx) = self.free_tags.pop() {
            self.tags[idx as usize] = Some(slot);
            return Ok(idx);
        }
        let idx = u32::try_from(self.tags.len()).map_err(|_| BcsError::AllocationFailure {
            what: "tag bucket arena",
            detail: "bucket index exceeds u32".to_owned(),
        })?;
        self.tags.push(Some(slot));
        Ok(idx)
    }

    fn free_tag(&mut self, idx: u32) {
        self.tags[idx as usize] = None;
        self.free_tags.push(idx);
        self.tag_count -= 1;
    }

    /// Stamp one block into the open generation, closing it when full.
    fn stamp(&mut self) -> Result<Generation> {
        let generation = self.global_generation;
        self.io_counter += 1;
        self.open_live += 1;
        if self.io_counter >= self.bump_threshold {
            self.close_generation()?;
        }
        Ok(generation)
    }

    fn close_generation(&mut self) -> Result<()> {
        let bucket = TagBucket {
            generation_id: self.global_generation,
            live_count: self.open_live,
        };
        let idx = self.alloc_tag(TagSlot { bucket, next: None })?;
        match self.tail.and_then(|t| self.slot_mut(t)) {
            Some(tail) => tail.next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        self.tag_count += 1;
        trace!(
            generation = bucket.generation_id.0,
            live = bucket.live_count,
            buckets = self.tag_count,
            "lowmem_lru: closed generation"
        );

        self.global_generation = self.global_generation.next();
        self.io_counter = 0;
        self.open_live = 0;

        if self.head_retire_pending && self.head != Some(idx) {
            self.retire_head();
        }
        Ok(())
    }

    /// Bucket accounting for `generation`: the first bucket, walking from the
    /// head, whose id is not below it.
    fn owning_bucket(&self, generation: Generation) -> Option<u32> {
        self.chain()
            .find(|(_, slot)| slot.bucket.generation_id >= generation)
            .map(|(idx, _)| idx)
    }

    /// Take one block out of the accounting for `generation`.
    fn release(&mut self, generation: Generation) -> Result<()> {
        if generation == self.global_generation {
            debug_assert!(self.open_live > 0, "open generation underflow");
            self.open_live = self.open_live.saturating_sub(1);
            return Ok(());
        }
        let idx = self
            .owning_bucket(generation)
            .ok_or(BcsError::UnknownGeneration {
                generation: generation.0,
            })?;
        self.decrement(idx);
        Ok(())
    }

    fn decrement(&mut self, idx: u32) {
        let Some(slot) = self.slot_mut(idx) else {
            return;
        };
        debug_assert!(slot.bucket.live_count > 0, "tag bucket underflow");
        slot.bucket.live_count = slot.bucket.live_count.saturating_sub(1);
        let live = slot.bucket.live_count;
        let next_idx = slot.next;

        if self.head == Some(idx) {
            if live < self.retained_blocks_target {
                match next_idx {
                    Some(_) => self.retire_head(),
                    None => self.head_retire_pending = true,
                }
            }
            return;
        }

        let Some(next_idx) = next_idx else {
            return;
        };
        let Some(next) = self.slot(next_idx).copied() else {
            return;
        };
        if live + next.bucket.live_count < self.bump_threshold {
            if let Some(slot) = self.slot_mut(idx) {
                slot.bucket.live_count += next.bucket.live_count;
                slot.bucket.generation_id = next.bucket.generation_id;
                slot.next = next.next;
            }
            if self.tail == Some(next_idx) {
                self.tail = Some(idx);
            }
            self.free_tag(next_idx);
        }
    }

    /// Fold the head into its successor, advancing the eviction floor. Keeps
    /// folding while the new head is empty and has a successor of its own.
    fn retire_head(&mut self) {
        self.head_retire_pending = false;
        while let Some(idx) = self.head {
            let Some(head) = self.slot(idx).copied() else {
                return;
            };
            let Some(next_idx) = head.next else {
                return;
            };
            let carried = head.bucket.live_count;
            let Some(successor) = self.slot_mut(next_idx) else {
                return;
            };
            successor.bucket.live_count += carried;
            let floor = successor.bucket.generation_id;
            let remaining = successor.bucket.live_count;
            self.head = Some(next_idx);
            self.free_tag(idx);
            trace!(floor = floor.0, carried, "lowmem_lru: retired head bucket");
            if remaining > 0 {
                return;
            }
        }
    }

    fn evict<S, R>(&mut self, residents: &S, rng: &mut R) -> Eviction
    where
        S: ResidentSampler<LowMemEntry> + ?Sized,
        R: Rng,
    {
        let floor = self.oldest_retained_generation();
        let population = residents.resident_count();
        let Some(floor) = floor.filter(|_| population > 0) else {
            return Eviction::Failed(BcsError::EvictionSearchExhausted {
                attempts: 0,
                floor: floor.map(|g| g.0),
            });
        };

        for attempt in 1..=self.max_eviction_attempts {
            let rank = rng.gen_range(0..population);
            let Some((key, entry)) = residents.resident_at(rank) else {
                continue;
            };
            if entry.generation > floor {
                continue;
            }
            let generation = entry.generation;
            if let Err(err) = self.release(generation) {
                return Eviction::Failed(err);
            }
            self.blocks_present -= 1;
            trace!(
                block = key.0,
                generation = generation.0,
                attempt,
                "lowmem_lru: evicted"
            );
            return Eviction::Evicted(key);
        }

        debug!(
            attempts = self.max_eviction_attempts,
            floor = floor.0,
            resident = self.blocks_present,
            "lowmem_lru: no evictable block found"
        );
        Eviction::Failed(BcsError::EvictionSearchExhausted {
            attempts: self.max_eviction_attempts,
            floor: Some(floor.0),
        })
    }
}

impl EvictionPolicy for LowMemLru {
    type Entry = LowMemEntry;

    fn name(&self) -> &'static str {
        "low_memory"
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn resident(&self) -> usize {
        self.blocks_present
    }

    fn insert<S, R>(
        &mut self,
        _key: CacheKey,
        residents: &S,
        rng: &mut R,
    ) -> Result<Admission<LowMemEntry>>
    where
        S: ResidentSampler<LowMemEntry> + ?Sized,
        R: Rng,
    {
        let generation = self.stamp()?;
        self.blocks_present += 1;
        let eviction = if self.blocks_present > self.capacity {
            self.evict(residents, rng)
        } else {
            Eviction::NotNeeded
        };
        Ok(Admission {
            entry: LowMemEntry { generation },
            eviction,
        })
    }

    fn reclaim<S, R>(&mut self, residents: &S, rng: &mut R) -> Eviction
    where
        S: ResidentSampler<LowMemEntry> + ?Sized,
        R: Rng,
    {
        if self.blocks_present > self.capacity {
            self.evict(residents, rng)
        } else {
            Eviction::NotNeeded
        }
    }

    fn bump(&mut self, _key: CacheKey, entry: &mut LowMemEntry) -> Result<()> {
        if entry.generation == self.global_generation {
            return Ok(());
        }
        self.release(entry.generation)?;
        entry.generation = self.stamp()?;
        Ok(())
    }

    fn discard(&mut self, _key: CacheKey, entry: LowMemEntry) -> Result<()> {
        self.release(entry.generation)?;
        self.blocks_present -= 1;
        Ok(())
    }

    fn metadata_bytes(&self) -> usize {
        mem::size_of::<Self>()
            + self.tags.capacity() * mem::size_of::<Option<TagSlot>>()
            + self.free_tags.capacity() * mem::size_of::<u32>()
    }
}
