//! Runtime strategy selection and whole-trace replay.

use crate::config::{SimConfig, Strategy};
use crate::report::SimReport;
use crate::simulator::{Access, TraceSimulator};
use crate::trace::TraceReader;
use bcs_error::Result;
use bcs_lru::{ExactLru, LowMemLru};
use bcs_types::{AccessOp, CacheKey};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use tracing::info;

/// A simulator built from a [`SimConfig`], with the strategy picked at runtime.
#[derive(Debug)]
pub enum Engine {
    Exact(TraceSimulator<ExactLru>),
    LowMemory(TraceSimulator<LowMemLru>),
}

impl Engine {
    /// Size and build the configured simulator for a trace addressing
    /// `total_blocks` blocks.
    pub fn from_config(config: &SimConfig, total_blocks: u64) -> Result<Self> {
        config.validate()?;
        let capacity = config.capacity_for(total_blocks)?;
        let buckets = config.index_buckets_for(capacity);
        let block_size = config.block_size()?;
        let rng = StdRng::seed_from_u64(config.seed);

        let engine = match config.strategy {
            Strategy::Exact => {
                let lru = ExactLru::new(capacity)?;
                Self::Exact(TraceSimulator::new(lru, buckets, rng)?.with_block_size(block_size))
            }
            Strategy::LowMemory => {
                let lru = LowMemLru::new(config.low_memory_target_percentage, capacity)?
                    .with_max_eviction_attempts(config.max_eviction_attempts);
                Self::LowMemory(
                    TraceSimulator::new(lru, buckets, rng)?.with_block_size(block_size),
                )
            }
        };
        Ok(engine)
    }

    #[must_use]
    pub fn strategy(&self) -> Strategy {
        match self {
            Self::Exact(_) => Strategy::Exact,
            Self::LowMemory(_) => Strategy::LowMemory,
        }
    }

    pub fn process(&mut self, block_start: u64, byte_length: u64) -> Result<u64> {
        match self {
            Self::Exact(sim) => sim.process(block_start, byte_length),
            Self::LowMemory(sim) => sim.process(block_start, byte_length),
        }
    }

    pub fn access(&mut self, key: CacheKey) -> Result<Access> {
        match self {
            Self::Exact(sim) => sim.access(key),
            Self::LowMemory(sim) => sim.access(key),
        }
    }

    #[must_use]
    pub fn report(&self) -> SimReport {
        match self {
            Self::Exact(sim) => sim.report(),
            Self::LowMemory(sim) => sim.report(),
        }
    }
}

/// What the trace contained, independent of cache behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceSummary {
    pub records: u64,
    pub reads: u64,
    pub writes: u64,
    /// Whole blocks touched across all records.
    pub blocks: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayOutcome {
    pub total_blocks: u64,
    pub summary: TraceSummary,
    pub report: SimReport,
}

/// Read a whole trace from `input` and replay it under `config`.
pub fn replay<R: BufRead>(config: &SimConfig, input: R) -> Result<ReplayOutcome> {
    let mut reader = TraceReader::new(input);
    let total_blocks = reader.read_total_blocks()?;
    let mut engine = Engine::from_config(config, total_blocks)?;
    let mut summary = TraceSummary::default();

    while let Some(record) = reader.next_record()? {
        summary.records += 1;
        match record.op {
            AccessOp::Read => summary.reads += 1,
            AccessOp::Write => summary.writes += 1,
        }
        summary.blocks += engine.process(record.start.0, record.length_bytes)?;
    }

    let report = engine.report();
    info!(
        strategy = %engine.strategy(),
        records = summary.records,
        hits = report.hits,
        misses = report.misses,
        resident = report.resident,
        anomalies = report.anomalies.total(),
        "replay: complete"
    );
    Ok(ReplayOutcome {
        total_blocks,
        summary,
        report,
    })
}
