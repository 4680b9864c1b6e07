//! Scenario runner for memlayer.
//!
//! This crate provides:
//! - Scenarios: the allocator's observable guarantees, replayed against presets
//! - Stress: multi-threaded alloc/resize/free churn with a size-class histogram
//! - Reporting: every outcome is emitted as one JSONL log line
//!
//! Everything here goes through the safe surface of `memlayer-core`.

#![forbid(unsafe_code)]

pub mod scenarios;

use thiserror::Error;

pub use scenarios::{ScenarioOutcome, StressOptions, StressReport, run_scenarios, run_stress};

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown preset '{0}'")]
    UnknownPreset(String),
    #[error("{failed} of {total} scenarios failed")]
    ScenariosFailed { failed: usize, total: usize },
    #[error("stress run lost track of {0} bytes")]
    StressImbalance(u64),
}
