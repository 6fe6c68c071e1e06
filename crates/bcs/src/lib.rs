#![forbid(unsafe_code)]
//! Block cache simulator public API facade.
//!
//! Re-exports the simulator from `bcs-sim` together with the index, policy and
//! error types it is built from. This is the crate the CLI depends on.

pub use bcs_error::{BcsError, Result};
pub use bcs_index::{HashIndex, KeyHasher, ModuloHasher, MultiplicativeHasher, ResidentSampler};
pub use bcs_lru::{
    Admission, Eviction, EvictionPolicy, ExactLru, LowMemEntry, LowMemLru, LruHandle, TagBucket,
};
pub use bcs_sim::*;
pub use bcs_types::{AccessOp, BlockSize, CacheKey, DEFAULT_BLOCK_SIZE, Generation};
