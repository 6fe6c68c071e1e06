#![forbid(unsafe_code)]
//! Fixed-bucket chained hash index from block keys to cache-entry handles.
//!
//! The bucket count is chosen at construction and never changes; the caller
//! knows the working-set size of the simulation up front. Each bucket owns a
//! singly linked chain of `(key, value)` nodes. Nodes live in one arena and
//! link to each other by slot index, so unlinking a node is an index update
//! rather than a pointer dance.
//!
//! Which bucket a key lands in is decided by a caller-supplied [`KeyHasher`].
//! Sequential block numbers spread perfectly under [`ModuloHasher`]; strided
//! or clustered key spaces do better with [`MultiplicativeHasher`] or a
//! closure.
//!
//! The index also implements [`ResidentSampler`]: per-bucket counts are
//! mirrored into a cumulative-count tree so "the k-th resident entry" can be
//! found without scanning every bucket.

mod weights;

use bcs_error::{BcsError, Result};
use bcs_types::CacheKey;
use tracing::debug;
use weights::BucketWeights;

/// Maps a key to a 64-bit hash; the index reduces it modulo the bucket count.
pub trait KeyHasher {
    fn hash(&self, key: CacheKey) -> u64;
}

/// Identity hash: `bucket = key mod num_buckets`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModuloHasher;

impl KeyHasher for ModuloHasher {
    fn hash(&self, key: CacheKey) -> u64 {
        key.0
    }
}

/// Fibonacci (multiplicative) hashing, for key spaces with strides that
/// collide under plain modulo.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiplicativeHasher;

impl KeyHasher for MultiplicativeHasher {
    fn hash(&self, key: CacheKey) -> u64 {
        key.0.wrapping_mul(0x9E37_79B9_7F4A_7C15).rotate_left(32)
    }
}

impl<F> KeyHasher for F
where
    F: Fn(CacheKey) -> u64,
{
    fn hash(&self, key: CacheKey) -> u64 {
        self(key)
    }
}

/// Uniform access to resident entries by rank, for random victim selection.
pub trait ResidentSampler<V> {
    /// Number of resident entries.
    fn resident_count(&self) -> usize;

    /// The `rank`-th resident entry (0-based), `None` if `rank` is out of range.
    fn resident_at(&self, rank: usize) -> Option<(CacheKey, &V)>;
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    head: Option<u32>,
    len: u32,
}

#[derive(Debug, Clone)]
struct ChainNode<V> {
    key: CacheKey,
    value: V,
    next: Option<u32>,
}

/// Chained hash table with a fixed bucket count.
///
/// Invariants:
/// - a key appears in at most one chain, at most once;
/// - `len()` equals the sum of all bucket lengths;
/// - the weight tree holds exactly the bucket lengths.
#[derive(Debug)]
pub struct HashIndex<V, H = ModuloHasher> {
    hasher: H,
    buckets: Vec<Bucket>,
    nodes: Vec<Option<ChainNode<V>>>,
    free: Vec<u32>,
    weights: BucketWeights,
    len: usize,
}

impl<V> HashIndex<V, ModuloHasher> {
    /// Index with `num_buckets` buckets and `key mod num_buckets` placement.
    pub fn with_modulo(num_buckets: usize) -> Result<Self> {
        Self::new(num_buckets, ModuloHasher)
    }
}

impl<V, H: KeyHasher> HashIndex<V, H> {
    pub fn new(num_buckets: usize, hasher: H) -> Result<Self> {
        Self::with_entry_capacity(num_buckets, hasher, 0)
    }

    /// Like [`HashIndex::new`], additionally reserving node storage for
    /// `entries` resident keys so a sized simulation never grows the arena.
    pub fn with_entry_capacity(num_buckets: usize, hasher: H, entries: usize) -> Result<Self> {
        if num_buckets == 0 {
            return Err(BcsError::InvalidConfig(
                "hash index needs at least one bucket".to_owned(),
            ));
        }
        let mut buckets = Vec::new();
        buckets
            .try_reserve_exact(num_buckets)
            .map_err(|err| BcsError::AllocationFailure {
                what: "hash index buckets",
                detail: err.to_string(),
            })?;
        buckets.resize(num_buckets, Bucket::default());

        let weights = BucketWeights::new(num_buckets)?;

        let mut nodes = Vec::new();
        nodes
            .try_reserve_exact(entries)
            .map_err(|err| BcsError::AllocationFailure {
                what: "hash index nodes",
                detail: err.to_string(),
            })?;

        debug!(num_buckets, entries, "hash_index: initialized");
        Ok(Self {
            hasher,
            buckets,
            nodes,
            free: Vec::new(),
            weights,
            len: 0,
        })
    }

    #[inline]
    fn bucket_of(&self, key: CacheKey) -> usize {
        let num_buckets = self.buckets.len() as u64;
        // The remainder is below `buckets.len()`, which is a usize.
        (self.hasher.hash(key) % num_buckets) as usize
    }

    fn chain(&self, bucket: usize) -> impl Iterator<Item = (u32, &ChainNode<V>)> + '_ {
        let mut cursor = self.buckets[bucket].head;
        std::iter::from_fn(move || {
            let idx = cursor?;
            let node = self.nodes.get(idx as usize)?.as_ref()?;
            cursor = node.next;
            Some((idx, node))
        })
    }

    fn find(&self, bucket: usize, key: CacheKey) -> Option<u32> {
        self.chain(bucket)
            .find(|(_, node)| node.key == key)
            .map(|(idx, _)| idx)
    }

    fn alloc_node(&mut self, node: ChainNode<V>) -> Result<u32> {
        if let Some(idx) = self.free.pop() {
            self.nodes[idx as usize] = Some(node);
            return Ok(idx);
        }
        let idx = u32::try_from(self.nodes.len()).map_err(|_| BcsError::AllocationFailure {
            what: "hash index nodes",
            detail: "node arena exceeds u32 slots".to_owned(),
        })?;
        self.nodes.push(Some(node));
        Ok(idx)
    }

    /// Insert `key -> value`. Fails with `DuplicateKey` if `key` is present.
    pub fn insert(&mut self, key: CacheKey, value: V) -> Result<()> {
        let bucket = self.bucket_of(key);
        if self.find(bucket, key).is_some() {
            return Err(BcsError::DuplicateKey { key: key.0 });
        }
        let idx = self.alloc_node(ChainNode {
            key,
            value,
            next: self.buckets[bucket].head,
        })?;
        let slot = &mut self.buckets[bucket];
        slot.head = Some(idx);
        slot.len += 1;
        self.weights.increment(bucket);
        self.len += 1;
        Ok(())
    }

    /// The value stored for `key`, without removing it.
    #[must_use]
    pub fn lookup(&self, key: CacheKey) -> Option<&V> {
        let idx = self.find(self.bucket_of(key), key)?;
        self.nodes[idx as usize].as_ref().map(|node| &node.value)
    }

    pub fn lookup_mut(&mut self, key: CacheKey) -> Option<&mut V> {
        let idx = self.find(self.bucket_of(key), key)?;
        self.nodes[idx as usize].as_mut().map(|node| &mut node.value)
    }

    #[must_use]
    pub fn contains(&self, key: CacheKey) -> bool {
        self.find(self.bucket_of(key), key).is_some()
    }

    /// Unlink `key` and return its value. Fails with `NotFound` if absent.
    pub fn delete(&mut self, key: CacheKey) -> Result<V> {
        let bucket = self.bucket_of(key);
        let mut prev = None;
        let mut found = None;
        for (idx, node) in self.chain(bucket) {
            if node.key == key {
                found = Some(idx);
                break;
            }
            prev = Some(idx);
        }
        let Some(idx) = found else {
            return Err(BcsError::NotFound { key: key.0 });
        };
        let Some(node) = self.nodes[idx as usize].take() else {
            return Err(BcsError::NotFound { key: key.0 });
        };

        match prev {
            None => self.buckets[bucket].head = node.next,
            Some(prev) => {
                if let Some(prev_node) = self.nodes[prev as usize].as_mut() {
                    prev_node.next = node.next;
                }
            }
        }
        self.free.push(idx);
        self.buckets[bucket].len -= 1;
        self.weights.decrement(bucket);
        self.len -= 1;
        Ok(node.value)
    }

    /// Total number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Alias of [`HashIndex::len`].
    #[must_use]
    pub fn size(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Chain length of bucket `bucket`, `None` if out of range.
    #[must_use]
    pub fn bucket_size(&self, bucket: usize) -> Option<usize> {
        self.buckets.get(bucket).map(|b| b.len as usize)
    }

    /// Length of the longest chain; a quick read on hasher quality.
    #[must_use]
    pub fn longest_chain(&self) -> usize {
        self.buckets.iter().map(|b| b.len as usize).max().unwrap_or(0)
    }

    /// All entries in bucket order, chain order within a bucket.
    pub fn iter(&self) -> impl Iterator<Item = (CacheKey, &V)> + '_ {
        (0..self.buckets.len())
            .flat_map(move |bucket| self.chain(bucket).map(|(_, node)| (node.key, &node.value)))
    }
}

impl<V, H: KeyHasher> ResidentSampler<V> for HashIndex<V, H> {
    fn resident_count(&self) -> usize {
        self.len
    }

    fn resident_at(&self, rank: usize) -> Option<(CacheKey, &V)> {
        let (bucket, offset) = self.weights.locate(rank as u64)?;
        debug_assert_eq!(self.weights.total(), self.len as u64);
        self.chain(bucket)
            .nth(usize::try_from(offset).ok()?)
            .map(|(_, node)| (node.key, &node.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::{BTreeMap, HashSet};

    fn bucket_sum<V, H: KeyHasher>(index: &HashIndex<V, H>) -> usize {
        (0..index.num_buckets())
            .map(|b| index.bucket_size(b).unwrap_or(0))
            .sum()
    }

    #[test]
    fn insert_lookup_delete() {
        let mut index = HashIndex::with_modulo(16).expect("index");
        index.insert(CacheKey(3), "three").expect("insert 3");
        index.insert(CacheKey(19), "nineteen").expect("insert 19");

        assert_eq!(index.lookup(CacheKey(3)), Some(&"three"));
        assert_eq!(index.lookup(CacheKey(19)), Some(&"nineteen"));
        assert_eq!(index.lookup(CacheKey(35)), None);
        assert_eq!(index.bucket_size(3), Some(2));
        assert_eq!(index.len(), 2);

        assert_eq!(index.delete(CacheKey(3)).expect("delete 3"), "three");
        assert_eq!(index.lookup(CacheKey(3)), None);
        assert_eq!(index.lookup(CacheKey(19)), Some(&"nineteen"));
        assert_eq!(index.bucket_size(3), Some(1));
        assert_eq!(index.size(), 1);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut index = HashIndex::with_modulo(4).expect("index");
        index.insert(CacheKey(8), 1_u32).expect("insert");
        let err = index.insert(CacheKey(8), 2_u32).expect_err("duplicate");
        assert!(matches!(err, BcsError::DuplicateKey { key: 8 }));
        assert_eq!(index.lookup(CacheKey(8)), Some(&1));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn delete_missing_key_reports_not_found() {
        let mut index: HashIndex<u32> = HashIndex::with_modulo(4).expect("index");
        let err = index.delete(CacheKey(5)).expect_err("missing");
        assert!(matches!(err, BcsError::NotFound { key: 5 }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn delete_from_middle_of_chain_keeps_neighbours() {
        let mut index = HashIndex::with_modulo(1).expect("index");
        for key in 0..5_u64 {
            index.insert(CacheKey(key), key).expect("insert");
        }
        assert_eq!(index.delete(CacheKey(2)).expect("delete"), 2);
        let mut keys: Vec<u64> = index.iter().map(|(k, _)| k.0).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec![0, 1, 3, 4]);
        assert_eq!(index.bucket_size(0), Some(4));
    }

    #[test]
    fn lookup_mut_updates_in_place() {
        let mut index = HashIndex::with_modulo(8).expect("index");
        index.insert(CacheKey(1), 10_u32).expect("insert");
        *index.lookup_mut(CacheKey(1)).expect("present") += 5;
        assert_eq!(index.lookup(CacheKey(1)), Some(&15));
    }

    #[test]
    fn zero_buckets_is_invalid_config() {
        let err = HashIndex::<u32>::with_modulo(0).expect_err("zero buckets");
        assert!(matches!(err, BcsError::InvalidConfig(_)));
    }

    #[test]
    fn oversized_table_reports_allocation_failure() {
        let err = HashIndex::<u32>::with_modulo(usize::MAX / 4).expect_err("too large");
        assert!(matches!(err, BcsError::AllocationFailure { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn closure_hasher_controls_placement() {
        let mut index = HashIndex::new(8, |key: CacheKey| key.0 / 100).expect("index");
        for key in 0..100_u64 {
            index.insert(CacheKey(key), ()).expect("insert");
        }
        assert_eq!(index.bucket_size(0), Some(100));
        assert_eq!(index.longest_chain(), 100);
    }

    #[test]
    fn multiplicative_hasher_spreads_strided_keys() {
        let mut modulo = HashIndex::with_modulo(64).expect("modulo");
        let mut fib = HashIndex::new(64, MultiplicativeHasher).expect("fib");
        for i in 0..256_u64 {
            modulo.insert(CacheKey(i * 64), ()).expect("insert");
            fib.insert(CacheKey(i * 64), ()).expect("insert");
        }
        assert_eq!(modulo.longest_chain(), 256);
        assert!(fib.longest_chain() < 64, "chain {}", fib.longest_chain());
    }

    #[test]
    fn resident_at_visits_every_entry_once() {
        let mut index = HashIndex::with_modulo(7).expect("index");
        for key in [3_u64, 10, 17, 4, 100, 0] {
            index.insert(CacheKey(key), key * 2).expect("insert");
        }
        let mut seen = HashSet::new();
        for rank in 0..index.resident_count() {
            let (key, value) = index.resident_at(rank).expect("rank in range");
            assert_eq!(*value, key.0 * 2);
            assert!(seen.insert(key), "rank {rank} repeated {key}");
        }
        assert_eq!(seen.len(), 6);
        assert!(index.resident_at(6).is_none());

        let ranked: Vec<CacheKey> = (0..6)
            .filter_map(|rank| index.resident_at(rank).map(|(k, _)| k))
            .collect();
        let iterated: Vec<CacheKey> = index.iter().map(|(k, _)| k).collect();
        assert_eq!(ranked, iterated);
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut index = HashIndex::with_entry_capacity(4, ModuloHasher, 4).expect("index");
        for round in 0..10_u64 {
            index.insert(CacheKey(round), round).expect("insert");
            index.delete(CacheKey(round)).expect("delete");
        }
        assert!(index.is_empty());
        assert_eq!(index.nodes.len(), 1);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(u64, u32),
        Delete(u64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0_u64..64, any::<u32>()).prop_map(|(k, v)| Op::Insert(k, v)),
            (0_u64..64).prop_map(Op::Delete),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn matches_btreemap_model(
            buckets in 1_usize..12,
            ops in proptest::collection::vec(op_strategy(), 0..200),
        ) {
            let mut index = HashIndex::with_modulo(buckets).expect("index");
            let mut model = BTreeMap::new();

            for op in ops {
                match op {
                    Op::Insert(key, value) => {
                        let result = index.insert(CacheKey(key), value);
                        if let std::collections::btree_map::Entry::Vacant(slot) = model.entry(key) {
                            prop_assert!(result.is_ok());
                            slot.insert(value);
                        } else {
                            prop_assert!(
                                matches!(result, Err(BcsError::DuplicateKey { .. })),
                                "duplicate insert must fail"
                            );
                        }
                    }
                    Op::Delete(key) => {
                        let result = index.delete(CacheKey(key));
                        match model.remove(&key) {
                            Some(expected) => prop_assert_eq!(result.ok(), Some(expected)),
                            None => prop_assert!(
                                matches!(result, Err(BcsError::NotFound { .. })),
                                "missing delete must fail"
                            ),
                        }
                    }
                }

                prop_assert_eq!(index.len(), model.len());
                prop_assert_eq!(bucket_sum(&index), model.len());
                let keys: Vec<u64> = index.iter().map(|(k, _)| k.0).collect();
                let unique: HashSet<u64> = keys.iter().copied().collect();
                prop_assert_eq!(unique.len(), keys.len());
            }

            for (key, value) in &model {
                prop_assert_eq!(index.lookup(CacheKey(*key)), Some(value));
            }
        }

        #[test]
        fn insert_then_lookup_round_trips(key in any::<u64>(), value in any::<u64>()) {
            let mut index = HashIndex::new(97, MultiplicativeHasher).expect("index");
            index.insert(CacheKey(key), value).expect("insert");
            prop_assert_eq!(index.lookup(CacheKey(key)), Some(&value));
        }
    }
}
