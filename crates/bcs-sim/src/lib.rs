#![forbid(unsafe_code)]
//! Block cache hit-ratio simulation.
//!
//! A [`TraceSimulator`] pairs a [`bcs_index::HashIndex`] with an
//! [`bcs_lru::EvictionPolicy`] and replays block accesses against them.
//! [`Engine`] picks the policy from a [`SimConfig`] at runtime and [`replay`]
//! drives a whole trace read through [`TraceReader`].

mod config;
mod engine;
mod report;
mod simulator;
mod trace;

pub use config::{DEFAULT_SEED, SimConfig, Strategy};
pub use engine::{Engine, ReplayOutcome, TraceSummary, replay};
pub use report::{Anomalies, SimReport};
pub use simulator::{Access, TraceSimulator};
pub use trace::{TraceReader, TraceRecord};
