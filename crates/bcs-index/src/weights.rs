//! Cumulative per-bucket element counts.
//!
//! A Fenwick (binary indexed) tree over bucket lengths. Victim sampling needs
//! "the bucket holding the k-th resident entry", which a prefix scan answers in
//! O(buckets); the tree answers it in O(log buckets) and stays O(log buckets)
//! to update on every insert and delete.

use bcs_error::{BcsError, Result};

#[derive(Debug, Clone)]
pub(crate) struct BucketWeights {
    /// 1-indexed Fenwick array; `tree[0]` is unused.
    tree: Vec<u64>,
    total: u64,
}

impl BucketWeights {
    pub(crate) fn new(buckets: usize) -> Result<Self> {
        let slots = buckets
            .checked_add(1)
            .ok_or_else(|| BcsError::InvalidConfig("bucket count overflows usize".to_owned()))?;
        let mut tree = Vec::new();
        tree.try_reserve_exact(slots)
            .map_err(|err| BcsError::AllocationFailure {
                what: "bucket weight tree",
                detail: err.to_string(),
            })?;
        tree.resize(slots, 0);
        Ok(Self { tree, total: 0 })
    }

    fn buckets(&self) -> usize {
        self.tree.len() - 1
    }

    pub(crate) fn total(&self) -> u64 {
        self.total
    }

    pub(crate) fn increment(&mut self, bucket: usize) {
        let mut i = bucket + 1;
        while i < self.tree.len() {
            self.tree[i] += 1;
            i += i & i.wrapping_neg();
        }
        self.total += 1;
    }

    pub(crate) fn decrement(&mut self, bucket: usize) {
        let mut i = bucket + 1;
        while i < self.tree.len() {
            debug_assert!(self.tree[i] > 0, "bucket weight underflow at {bucket}");
            self.tree[i] = self.tree[i].saturating_sub(1);
            i += i & i.wrapping_neg();
        }
        self.total = self.total.saturating_sub(1);
    }

    /// Sum of the first `buckets` bucket weights.
    #[cfg(test)]
    pub(crate) fn prefix(&self, buckets: usize) -> u64 {
        let mut i = buckets.min(self.buckets());
        let mut sum = 0;
        while i > 0 {
            sum += self.tree[i];
            i &= i - 1;
        }
        sum
    }

    /// Bucket holding the `rank`-th (0-based) element in bucket order, and the
    /// element's offset inside that bucket.
    pub(crate) fn locate(&self, rank: u64) -> Option<(usize, u64)> {
        if rank >= self.total {
            return None;
        }
        let n = self.buckets();
        let mut pos = 0_usize;
        let mut remaining = rank;
        let mut step = 1_usize << (usize::BITS - 1 - n.leading_zeros());
        while step > 0 {
            let next = pos + step;
            if next <= n && self.tree[next] <= remaining {
                pos = next;
                remaining -= self.tree[next];
            }
            step >>= 1;
        }
        Some((pos, remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn linear_locate(counts: &[u64], rank: u64) -> Option<(usize, u64)> {
        let mut seen = 0;
        for (bucket, count) in counts.iter().enumerate() {
            if rank < seen + count {
                return Some((bucket, rank - seen));
            }
            seen += count;
        }
        None
    }

    #[test]
    fn locate_skips_empty_buckets() {
        let mut weights = BucketWeights::new(8).expect("weights");
        weights.increment(2);
        weights.increment(2);
        weights.increment(5);

        assert_eq!(weights.total(), 3);
        assert_eq!(weights.locate(0), Some((2, 0)));
        assert_eq!(weights.locate(1), Some((2, 1)));
        assert_eq!(weights.locate(2), Some((5, 0)));
        assert_eq!(weights.locate(3), None);

        weights.decrement(2);
        assert_eq!(weights.locate(1), Some((5, 0)));
        assert_eq!(weights.prefix(3), 1);
        assert_eq!(weights.prefix(8), 2);
    }

    #[test]
    fn single_bucket() {
        let mut weights = BucketWeights::new(1).expect("weights");
        assert_eq!(weights.locate(0), None);
        weights.increment(0);
        assert_eq!(weights.locate(0), Some((0, 0)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn locate_matches_prefix_scan(
            counts in proptest::collection::vec(0_u64..5, 1..70),
        ) {
            let mut weights = BucketWeights::new(counts.len()).expect("weights");
            for (bucket, count) in counts.iter().enumerate() {
                for _ in 0..*count {
                    weights.increment(bucket);
                }
            }
            let total: u64 = counts.iter().sum();
            prop_assert_eq!(weights.total(), total);
            for rank in 0..=total {
                prop_assert_eq!(weights.locate(rank), linear_locate(&counts, rank));
            }
            for buckets in 0..=counts.len() {
                prop_assert_eq!(weights.prefix(buckets), counts[..buckets].iter().sum::<u64>());
            }
        }
    }
}
