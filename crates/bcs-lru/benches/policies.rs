#![forbid(unsafe_code)]

use bcs_index::HashIndex;
use bcs_lru::{EvictionPolicy, ExactLru, LowMemLru};
use bcs_types::CacheKey;
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rand::SeedableRng;
use rand::rngs::StdRng;

const CAPACITY: usize = 4_096;
const WORKING_SET: u64 = 8_192;

/// Drive `policy` through one access, keeping `index` in sync.
fn access<P: EvictionPolicy>(
    policy: &mut P,
    index: &mut HashIndex<P::Entry>,
    rng: &mut StdRng,
    key: CacheKey,
) {
    if let Some(entry) = index.lookup_mut(key) {
        policy.bump(key, entry).expect("bump");
        return;
    }
    let admission = policy.insert(key, &*index, rng).expect("insert");
    if let Some(victim) = admission.eviction.victim() {
        index.delete(victim).expect("victim");
    }
    index.insert(key, admission.entry).expect("index insert");
}

// ── Benchmarks ──────────────────────────────────────────────────────────

fn bench_exact_hit(c: &mut Criterion) {
    let mut lru = ExactLru::new(CAPACITY).expect("lru");
    let mut index = HashIndex::with_modulo(CAPACITY).expect("index");
    let mut rng = StdRng::seed_from_u64(1);
    for k in 0..CAPACITY as u64 {
        access(&mut lru, &mut index, &mut rng, CacheKey(k));
    }

    let mut i = 0_u64;
    c.bench_function("exact_lru_hit", |b| {
        b.iter(|| {
            access(&mut lru, &mut index, &mut rng, black_box(CacheKey(i % CAPACITY as u64)));
            i += 1;
        });
    });
}

fn bench_lowmem_hit(c: &mut Criterion) {
    let mut lru = LowMemLru::new(50, CAPACITY).expect("lru");
    let mut index = HashIndex::with_modulo(CAPACITY).expect("index");
    let mut rng = StdRng::seed_from_u64(1);
    for k in 0..CAPACITY as u64 {
        access(&mut lru, &mut index, &mut rng, CacheKey(k));
    }

    let mut i = 0_u64;
    c.bench_function("lowmem_lru_hit", |b| {
        b.iter(|| {
            access(&mut lru, &mut index, &mut rng, black_box(CacheKey(i % CAPACITY as u64)));
            i += 1;
        });
    });
}

fn bench_exact_mixed(c: &mut Criterion) {
    // Working set twice the capacity: a steady stream of evictions.
    let mut lru = ExactLru::new(CAPACITY).expect("lru");
    let mut index = HashIndex::with_modulo(CAPACITY).expect("index");
    let mut rng = StdRng::seed_from_u64(2);

    let mut i = 0_u64;
    c.bench_function("exact_lru_mixed", |b| {
        b.iter(|| {
            let key = CacheKey(i.wrapping_mul(2_654_435_761) % WORKING_SET);
            access(&mut lru, &mut index, &mut rng, black_box(key));
            i += 1;
        });
    });
}

fn bench_lowmem_mixed(c: &mut Criterion) {
    let mut lru = LowMemLru::new(50, CAPACITY).expect("lru");
    let mut index = HashIndex::with_modulo(CAPACITY).expect("index");
    let mut rng = StdRng::seed_from_u64(2);

    let mut i = 0_u64;
    c.bench_function("lowmem_lru_mixed", |b| {
        b.iter(|| {
            let key = CacheKey(i.wrapping_mul(2_654_435_761) % WORKING_SET);
            access(&mut lru, &mut index, &mut rng, black_box(key));
            i += 1;
        });
    });
}

criterion_group!(
    policy_benches,
    bench_exact_hit,
    bench_lowmem_hit,
    bench_exact_mixed,
    bench_lowmem_mixed,
);
criterion_main!(policy_benches);
