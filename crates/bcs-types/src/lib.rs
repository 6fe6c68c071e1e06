#![forbid(unsafe_code)]
//! Shared vocabulary types for the block cache simulator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Block size of the reference SPC workloads.
pub const DEFAULT_BLOCK_SIZE: u32 = 512;

/// Key of one cached block: the block number on the traced device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CacheKey(pub u64);

impl CacheKey {
    /// Key of the block `offset` blocks after this one, `None` on overflow.
    #[must_use]
    pub fn checked_add(self, offset: u64) -> Option<Self> {
        self.0.checked_add(offset).map(Self)
    }
}

/// Coarse recency stamp used by the low-memory LRU.
///
/// Generations only ever increase; a smaller generation means an older stamp.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Generation(pub u64);

impl Generation {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

/// Validated block size (any non-zero power of two).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockSize(u32);

impl BlockSize {
    pub const DEFAULT: Self = Self(DEFAULT_BLOCK_SIZE);

    pub fn new(value: u32) -> Result<Self, ParseError> {
        if !value.is_power_of_two() {
            return Err(ParseError::InvalidField {
                field: "block_size",
                reason: "must be a non-zero power of two",
            });
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    /// Number of whole blocks covered by `bytes` (truncating).
    #[must_use]
    pub fn whole_blocks(self, bytes: u64) -> u64 {
        bytes >> self.0.trailing_zeros()
    }
}

impl Default for BlockSize {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Direction of one traced request. The cache treats reads and writes alike;
/// the op is kept for trace summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessOp {
    Read,
    Write,
}

impl AccessOp {
    #[must_use]
    pub fn as_char(self) -> char {
        match self {
            Self::Read => 'R',
            Self::Write => 'W',
        }
    }
}

impl FromStr for AccessOp {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "R" | "r" => Ok(Self::Read),
            "W" | "w" => Ok(Self::Write),
            _ => Err(ParseError::InvalidField {
                field: "op",
                reason: "expected R or W",
            }),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BlockSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for AccessOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_size_validation() {
        assert_eq!(BlockSize::new(512).expect("512").get(), 512);
        assert!(BlockSize::new(4096).is_ok());
        assert!(BlockSize::new(1).is_ok());

        assert!(BlockSize::new(0).is_err());
        assert!(BlockSize::new(3000).is_err());
    }

    #[test]
    fn whole_blocks_truncates() {
        let bs = BlockSize::DEFAULT;
        assert_eq!(bs.whole_blocks(0), 0);
        assert_eq!(bs.whole_blocks(511), 0);
        assert_eq!(bs.whole_blocks(512), 1);
        assert_eq!(bs.whole_blocks(4096), 8);
        assert_eq!(bs.whole_blocks(4097), 8);
    }

    #[test]
    fn access_op_parsing() {
        assert_eq!("R".parse::<AccessOp>().expect("R"), AccessOp::Read);
        assert_eq!("w".parse::<AccessOp>().expect("w"), AccessOp::Write);
        assert_eq!(
            "X".parse::<AccessOp>(),
            Err(ParseError::InvalidField {
                field: "op",
                reason: "expected R or W",
            })
        );
        assert!("RW".parse::<AccessOp>().is_err());
        assert_eq!(AccessOp::Write.to_string(), "W");
    }

    #[test]
    fn cache_key_offsets() {
        assert_eq!(CacheKey(10).checked_add(5), Some(CacheKey(15)));
        assert_eq!(CacheKey(u64::MAX).checked_add(1), None);
        assert_eq!(CacheKey(42).to_string(), "42");
    }

    #[test]
    fn generations_are_ordered() {
        assert!(Generation::ZERO < Generation::ZERO.next());
        assert_eq!(Generation(u64::MAX).next(), Generation(u64::MAX));
    }
}
