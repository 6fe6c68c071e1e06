#![forbid(unsafe_code)]
//! Error types for the block cache simulator.
//!
//! # Error Taxonomy
//!
//! | Variant | Raised by | Class |
//! |---------|-----------|-------|
//! | `AllocationFailure` | index construction | fatal |
//! | `InvalidConfig` | config validation, engine construction | fatal |
//! | `InvalidHandle` | exact LRU `bump`/`discard` on a detached or foreign slot | fatal |
//! | `UnknownGeneration` | low-memory LRU tag chain lookup | fatal |
//! | `Io` | trace input | fatal |
//! | `Trace` | trace tokenizer | fatal |
//! | `DuplicateKey` | `HashIndex::insert` | recoverable |
//! | `NotFound` | `HashIndex::delete` | recoverable |
//! | `EvictionSearchExhausted` | low-memory victim search | recoverable |
//!
//! Fatal errors stop a replay. Recoverable errors are counted by the
//! simulator and show up in its report as anomalies; a correct run has none.

use thiserror::Error;

/// Unified error type for all simulator operations.
#[derive(Debug, Error)]
pub enum BcsError {
    /// Operating system I/O error while reading a trace.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Rejected configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A fixed-size table could not be reserved up front.
    #[error("allocation failure: {what}: {detail}")]
    AllocationFailure { what: &'static str, detail: String },

    /// The key is already present in the hash index.
    ///
    /// Under correct simulator logic a block is only inserted after a lookup
    /// miss, so this signals an index/policy disagreement.
    #[error("duplicate key: block {key}")]
    DuplicateKey { key: u64 },

    /// The key is not present in the hash index.
    #[error("key not found: block {key}")]
    NotFound { key: u64 },

    /// Every sampled resident was too young to evict.
    #[error(
        "eviction search exhausted after {attempts} attempts (no resident at or below generation {floor:?})"
    )]
    EvictionSearchExhausted { attempts: u32, floor: Option<u64> },

    /// An LRU handle that is not linked into the list, or that belongs to a
    /// different key. Programmer error.
    #[error("invalid LRU handle {handle}: {detail}")]
    InvalidHandle { handle: u32, detail: String },

    /// A live entry carries a generation no retained tag bucket accounts for.
    #[error("no tag bucket owns generation {generation}")]
    UnknownGeneration { generation: u64 },

    /// Malformed trace input.
    #[error("trace record {record}: {detail}")]
    Trace { record: u64, detail: String },
}

impl BcsError {
    /// Whether this error must stop the simulation.
    ///
    /// The match is exhaustive so a new variant cannot be added without
    /// classifying it.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Io(_)
            | Self::InvalidConfig(_)
            | Self::AllocationFailure { .. }
            | Self::InvalidHandle { .. }
            | Self::UnknownGeneration { .. }
            | Self::Trace { .. } => true,
            Self::DuplicateKey { .. }
            | Self::NotFound { .. }
            | Self::EvictionSearchExhausted { .. } => false,
        }
    }
}

/// Result alias using `BcsError`.
pub type Result<T> = std::result::Result<T, BcsError>;
