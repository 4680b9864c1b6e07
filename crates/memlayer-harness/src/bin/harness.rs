//! CLI entrypoint for the memlayer scenario harness.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use memlayer_harness::{HarnessError, StressOptions, run_scenarios, run_stress};
use memlayer_policy::{ConfigDescriptor, LogEmitter, LogEntry, LogLevel};

/// Scenario and stress tooling for memlayer.
#[derive(Debug, Parser)]
#[command(name = "memlayer-harness")]
#[command(about = "Scenario runner and stress driver for memlayer")]
struct Cli {
    /// Append JSONL output to this file instead of stdout.
    #[arg(long, global = true)]
    log: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run every scenario and emit one line per outcome.
    Scenarios,
    /// List the preset configurations.
    Presets,
    /// Churn allocations across threads against one preset.
    Stress {
        /// Preset name (`default`, `high_performance`, `debug`, `embedded`, `thread_safe`).
        #[arg(long, default_value = "thread_safe")]
        preset: String,
        #[arg(long, default_value_t = 4)]
        threads: usize,
        /// Operations per thread.
        #[arg(long, default_value_t = 10_000)]
        iterations: usize,
        /// Root seed (decimal or 0x...).
        #[arg(long, default_value = "0xDEAD_BEEF")]
        seed: String,
    },
    /// Print version and build information.
    Info,
}

fn parse_seed(raw: &str) -> Result<u64, std::num::ParseIntError> {
    let cleaned = raw.replace('_', "");
    match cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => cleaned.parse(),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut emitter = match &cli.log {
        Some(path) => LogEmitter::to_file(path)?,
        None => LogEmitter::stdout(),
    };

    match cli.command {
        Command::Scenarios => {
            let outcomes = run_scenarios();
            let total = outcomes.len();
            let mut failed = 0;
            for outcome in &outcomes {
                let level = if outcome.passed {
                    LogLevel::Info
                } else {
                    failed += 1;
                    LogLevel::Error
                };
                let entry = LogEntry::new(level, "harness.scenario")
                    .with_message(format!("{} [{}]: {}", outcome.name, outcome.preset, outcome.detail))
                    .with_details(serde_json::to_value(outcome)?);
                emitter.emit_entry(&entry)?;
            }
            emitter.emit(
                if failed == 0 { LogLevel::Info } else { LogLevel::Error },
                "harness.summary",
                Some(&format!("{} of {total} scenarios passed", total - failed)),
            )?;
            emitter.flush()?;
            if failed > 0 {
                return Err(HarnessError::ScenariosFailed { failed, total }.into());
            }
        }
        Command::Presets => {
            for preset in ConfigDescriptor::PRESETS {
                let entry = LogEntry::new(LogLevel::Info, "harness.preset")
                    .with_message(preset.name)
                    .with_details(serde_json::to_value(preset)?);
                emitter.emit_entry(&entry)?;
            }
            emitter.flush()?;
        }
        Command::Stress {
            preset,
            threads,
            iterations,
            seed,
        } => {
            let options = StressOptions {
                threads,
                iterations,
                seed: parse_seed(&seed)?,
            };
            let report = run_stress(&preset, options)?;
            let entry = LogEntry::new(LogLevel::Info, "harness.stress")
                .with_message(format!(
                    "{} operations on {} in {} us",
                    report.operations, report.preset, report.elapsed_us
                ))
                .with_details(serde_json::to_value(&report)?);
            emitter.emit_entry(&entry)?;
            emitter.flush()?;
            if report.imbalance() != 0 {
                return Err(HarnessError::StressImbalance(report.imbalance()).into());
            }
        }
        Command::Info => {
            let entry = LogEntry::new(LogLevel::Info, "harness.info")
                .with_message(format!("memlayer {}", memlayer_core::VERSION))
                .with_details(serde_json::to_value(memlayer_core::module_info())?);
            emitter.emit_entry(&entry)?;
            emitter.flush()?;
        }
    }

    Ok(())
}
