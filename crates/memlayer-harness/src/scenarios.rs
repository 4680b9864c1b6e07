//! Allocator scenarios and the multi-threaded stress run.
//!
//! Each scenario builds its own engine with a collecting error handler, so
//! reports never reach the process-wide handler and never abort.

use std::cell::{Cell, RefCell};
use std::time::Instant;

use serde::Serialize;

use memlayer_core::{AlignedAllocation, Allocation, MemoryManager, UniqueArray};
use memlayer_policy::{
    AtomicCounter, ConfigDescriptor, Counter, DebugConfig, DefaultConfig, EmbeddedConfig,
    ErrorSeverity, HighPerformanceConfig, MemoryConfig, MemoryStats, RuntimeConfig, SizeClass,
    ThreadSafeConfig,
};

use crate::HarnessError;

/// Runtime settings shared by scenario engines: every feature off.
static SCENARIO_RUNTIME: RuntimeConfig = RuntimeConfig::new();

thread_local! {
    static REPORTS: RefCell<Vec<(ErrorSeverity, String)>> = const { RefCell::new(Vec::new()) };
    static DROPS: Cell<usize> = const { Cell::new(0) };
}

fn collect(severity: ErrorSeverity, _function: &str, _file: &str, _line: u32, message: &str) {
    REPORTS.with(|r| r.borrow_mut().push((severity, message.to_string())));
}

fn drain_reports() -> Vec<(ErrorSeverity, String)> {
    REPORTS.with(|r| std::mem::take(&mut *r.borrow_mut()))
}

fn engine<C: MemoryConfig>() -> MemoryManager<C> {
    MemoryManager::<C>::new()
        .with_error_handler(collect)
        .with_runtime_config(&SCENARIO_RUNTIME)
}

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self {
            state: seed.max(1),
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn below(&mut self, upper: u64) -> u64 {
        self.next_u64() % upper.max(1)
    }
}

/// Result of one scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioOutcome {
    pub name: &'static str,
    pub preset: &'static str,
    pub passed: bool,
    pub detail: String,
    pub stats: MemoryStats,
}

#[derive(Default)]
struct Check {
    failures: Vec<String>,
}

impl Check {
    fn expect(&mut self, condition: bool, failure: impl FnOnce() -> String) {
        if !condition {
            self.failures.push(failure());
        }
    }

    fn finish(self, name: &'static str, preset: &'static str, stats: MemoryStats) -> ScenarioOutcome {
        let passed = self.failures.is_empty();
        let detail = if passed {
            String::from("ok")
        } else {
            self.failures.join("; ")
        };
        ScenarioOutcome {
            name,
            preset,
            passed,
            detail,
            stats,
        }
    }
}

struct Droppy(#[allow(dead_code)] usize);

impl Drop for Droppy {
    fn drop(&mut self) {
        DROPS.with(|d| d.set(d.get() + 1));
    }
}

fn round_trip_neutrality<C: MemoryConfig>() -> ScenarioOutcome {
    let engine = engine::<C>();
    let mut check = Check::default();
    let before = engine.stats();
    for n in [1, 100, 4096] {
        let block = Allocation::zeroed(&engine, n, true);
        check.expect(block.is_some(), || format!("alloc({n}) failed"));
    }
    let after = engine.stats();
    check.expect(after.current_usage == before.current_usage, || {
        format!(
            "usage {} after round trips, expected {}",
            after.current_usage, before.current_usage
        )
    });
    check.expect(after.allocation_count == after.deallocation_count, || {
        format!(
            "{} allocations against {} deallocations",
            after.allocation_count, after.deallocation_count
        )
    });
    check.finish("round_trip_neutrality", C::DESCRIPTOR.name, after)
}

fn usage_grows_by_request<C: MemoryConfig>() -> ScenarioOutcome {
    let engine = engine::<C>();
    let mut check = Check::default();
    for n in [1, 7, 100, 4096, 65_537] {
        let before = engine.usage();
        let block = Allocation::zeroed(&engine, n, false);
        let during = engine.usage();
        check.expect(block.is_some(), || format!("alloc({n}) failed"));
        check.expect(during == before + n as u64, || {
            format!("usage {during} after alloc({n}), expected {}", before + n as u64)
        });
    }
    check.finish("usage_grows_by_request", C::DESCRIPTOR.name, engine.stats())
}

fn peak_keeps_maximum() -> ScenarioOutcome {
    const THREADS: u64 = 4;
    let peak = AtomicCounter::new(0);
    let offered_max = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let peak = &peak;
                scope.spawn(move || {
                    let mut rng = XorShift64::new(t + 1);
                    let mut local = 0;
                    for _ in 0..10_000 {
                        let value = rng.next_u64() >> 20;
                        local = local.max(value);
                        peak.exchange_if_greater(value);
                    }
                    local
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or(u64::MAX))
            .max()
            .unwrap_or(0)
    });
    let mut check = Check::default();
    check.expect(peak.get() == offered_max, || {
        format!("stored {} but maximum offered was {offered_max}", peak.get())
    });
    check.finish("peak_keeps_maximum", "thread_safe", MemoryStats::default())
}

fn array_round_trip() -> ScenarioOutcome {
    const LEN: usize = 17;
    let engine = engine::<DebugConfig>();
    let mut check = Check::default();
    let before = DROPS.with(Cell::get);
    match UniqueArray::new_with(&engine, LEN, Droppy) {
        Some(array) => check.expect(array.len() == LEN, || {
            format!("array length {} expected {LEN}", array.len())
        }),
        None => check.expect(false, || String::from("array allocation failed")),
    }
    let dropped = DROPS.with(Cell::get) - before;
    check.expect(dropped == LEN, || format!("{dropped} drops, expected {LEN}"));
    check.expect(engine.usage() == 0, || {
        format!("usage {} after array release", engine.usage())
    });
    check.finish("array_round_trip", DebugConfig::DESCRIPTOR.name, engine.stats())
}

fn aligned_sweep<C: MemoryConfig>() -> ScenarioOutcome {
    let engine = engine::<C>();
    let mut check = Check::default();
    let baseline = engine.usage();
    let mut peak_after_first = None;
    let mut alignment = 8;
    while alignment <= 4096 {
        for _ in 0..50 {
            match AlignedAllocation::zeroed(&engine, 1000, alignment) {
                Some(block) => check.expect(block.as_ptr() as usize % alignment == 0, || {
                    format!("address {:p} not aligned to {alignment}", block.as_ptr())
                }),
                None => check.expect(false, || format!("alloc_aligned(1000, {alignment}) failed")),
            }
        }
        peak_after_first.get_or_insert(engine.peak_usage());
        alignment <<= 1;
    }
    check.expect(engine.usage() == baseline, || {
        format!("usage {} after sweep, baseline {baseline}", engine.usage())
    });
    let first_peak = peak_after_first.unwrap_or(0);
    check.expect(engine.peak_usage() == first_peak, || {
        format!(
            "peak grew from {first_peak} to {} over the sweep",
            engine.peak_usage()
        )
    });
    check.finish("aligned_sweep", C::DESCRIPTOR.name, engine.stats())
}

fn reset_baseline() -> ScenarioOutcome {
    let engine = engine::<DebugConfig>();
    let mut check = Check::default();
    let pair = |engine: &MemoryManager<DebugConfig>| {
        drop(Allocation::zeroed(engine, 10, false));
        engine.stats()
    };
    let first = pair(&engine);
    engine.reset_stats();
    check.expect(engine.stats() == MemoryStats::default(), || {
        String::from("counters not zero after reset")
    });
    let second = pair(&engine);
    check.expect(first == second, || {
        format!("deltas differ after reset: {first:?} vs {second:?}")
    });
    check.finish("reset_baseline", DebugConfig::DESCRIPTOR.name, second)
}

fn debug_alloc_free() -> ScenarioOutcome {
    let engine = engine::<DebugConfig>();
    let mut check = Check::default();
    let block = Allocation::zeroed(&engine, 100, false);
    check.expect(block.is_some(), || String::from("alloc(100) failed"));
    check.expect(engine.usage() == 100, || format!("usage {} expected 100", engine.usage()));
    check.expect(engine.stats().allocation_count == 1, || {
        String::from("allocation count not 1")
    });
    drop(block);
    check.expect(engine.usage() == 0, || format!("usage {} after free", engine.usage()));
    check.expect(engine.stats().deallocation_count == 1, || {
        String::from("deallocation count not 1")
    });
    check.finish("debug_alloc_free", DebugConfig::DESCRIPTOR.name, engine.stats())
}

fn aligned_neighbor_intact() -> ScenarioOutcome {
    let engine = engine::<DebugConfig>();
    let mut check = Check::default();
    let Some(mut neighbor) = Allocation::zeroed(&engine, 64, false) else {
        check.expect(false, || String::from("neighbor allocation failed"));
        return check.finish("aligned_neighbor_intact", "debug", engine.stats());
    };
    neighbor.as_mut_slice().fill(0xEE);
    match AlignedAllocation::zeroed(&engine, 37, 64) {
        Some(mut block) => {
            check.expect(block.as_ptr() as usize % 64 == 0, || {
                format!("address {:p} not 64-byte aligned", block.as_ptr())
            });
            block.as_mut_slice().fill(0x11);
        }
        None => check.expect(false, || String::from("alloc_aligned(37, 64) failed")),
    }
    check.expect(neighbor.as_slice().iter().all(|&b| b == 0xEE), || {
        String::from("adjacent block was overwritten")
    });
    drop(neighbor);
    check.finish("aligned_neighbor_intact", DebugConfig::DESCRIPTOR.name, engine.stats())
}

fn detailed_leak_dump() -> ScenarioOutcome {
    let engine = engine::<DebugConfig>();
    let mut check = Check::default();
    drain_reports();
    let a = Allocation::zeroed(&engine, 50, false);
    let b = Allocation::zeroed(&engine, 75, false);
    let report = engine.dump_allocations();
    let sizes: Vec<u64> = report.leaks.iter().map(|l| l.size).collect();
    check.expect(sizes == [50, 75], || format!("leak sizes {sizes:?}, expected [50, 75]"));
    let warnings = drain_reports()
        .into_iter()
        .filter(|(s, _)| *s == ErrorSeverity::Warning)
        .count();
    check.expect(warnings == 2, || format!("{warnings} leak warnings, expected 2"));
    drop((a, b));
    check.expect(engine.dump_allocations().is_clean(), || {
        String::from("leaks remain after release")
    });
    check.finish("detailed_leak_dump", DebugConfig::DESCRIPTOR.name, engine.stats())
}

fn invalid_alignment_reported() -> ScenarioOutcome {
    let engine = engine::<ThreadSafeConfig>();
    let mut check = Check::default();
    drain_reports();
    check.expect(engine.alloc_aligned(16, 24).is_none(), || {
        String::from("alignment 24 was accepted")
    });
    let reports = drain_reports();
    check.expect(reports.len() == 1, || format!("{} reports, expected 1", reports.len()));
    check.finish(
        "invalid_alignment_reported",
        ThreadSafeConfig::DESCRIPTOR.name,
        engine.stats(),
    )
}

/// Run every scenario against the presets it applies to.
#[must_use]
pub fn run_scenarios() -> Vec<ScenarioOutcome> {
    let outcomes = vec![
        round_trip_neutrality::<DefaultConfig>(),
        round_trip_neutrality::<HighPerformanceConfig>(),
        round_trip_neutrality::<DebugConfig>(),
        round_trip_neutrality::<EmbeddedConfig>(),
        round_trip_neutrality::<ThreadSafeConfig>(),
        usage_grows_by_request::<DebugConfig>(),
        usage_grows_by_request::<ThreadSafeConfig>(),
        peak_keeps_maximum(),
        array_round_trip(),
        aligned_sweep::<DebugConfig>(),
        aligned_sweep::<ThreadSafeConfig>(),
        reset_baseline(),
        debug_alloc_free(),
        aligned_neighbor_intact(),
        detailed_leak_dump(),
        invalid_alignment_reported(),
    ];
    drain_reports();
    outcomes
}

// ---------------------------------------------------------------------------
// Stress
// ---------------------------------------------------------------------------

/// Runtime settings for stress engines: only the size-class thresholds matter.
static STRESS_RUNTIME: RuntimeConfig = RuntimeConfig::new();

#[derive(Debug, Clone, Copy)]
pub struct StressOptions {
    pub threads: usize,
    pub iterations: usize,
    pub seed: u64,
}

impl Default for StressOptions {
    fn default() -> Self {
        Self {
            threads: 4,
            iterations: 10_000,
            seed: 0xDEAD_BEEF,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SizeClassCounts {
    pub small: u64,
    pub medium: u64,
    pub large: u64,
}

impl SizeClassCounts {
    fn record(&mut self, class: SizeClass) {
        match class {
            SizeClass::Small => self.small += 1,
            SizeClass::Medium => self.medium += 1,
            SizeClass::Large => self.large += 1,
        }
    }

    fn merge(&mut self, other: Self) {
        self.small += other.small;
        self.medium += other.medium;
        self.large += other.large;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StressReport {
    pub preset: &'static str,
    pub threads: usize,
    pub iterations: usize,
    /// True when all threads shared one engine; presets without thread
    /// safety give each thread its own.
    pub shared_engine: bool,
    pub operations: u64,
    pub elapsed_us: u128,
    pub size_classes: SizeClassCounts,
    pub stats: MemoryStats,
}

impl StressReport {
    /// Tracked bytes still outstanding after every block was released.
    #[must_use]
    pub fn imbalance(&self) -> u64 {
        self.stats.current_usage
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    operations: u64,
    classes: SizeClassCounts,
}

fn request_size(rng: &mut XorShift64) -> usize {
    let roll = rng.below(100);
    let size = if roll < 70 {
        1 + rng.below(256)
    } else if roll < 98 {
        257 + rng.below(64 * 1024)
    } else {
        1024 * 1024 + rng.below(4096)
    };
    size as usize
}

fn churn<C: MemoryConfig>(engine: &MemoryManager<C>, seed: u64, iterations: usize) -> Tally {
    const MAX_LIVE: usize = 32;
    let mut rng = XorShift64::new(seed);
    let mut live: Vec<Allocation<'_, C>> = Vec::with_capacity(MAX_LIVE);
    let mut tally = Tally::default();
    for _ in 0..iterations {
        let roll = rng.below(10);
        if live.is_empty() || (roll < 5 && live.len() < MAX_LIVE) {
            let size = request_size(&mut rng);
            tally
                .classes
                .record(engine.runtime().classify(size as u64));
            if let Some(mut block) = Allocation::zeroed(engine, size, false) {
                block.as_mut_slice()[0] = seed as u8;
                live.push(block);
            }
        } else if roll < 7 {
            let index = rng.below(live.len() as u64) as usize;
            let size = request_size(&mut rng);
            tally
                .classes
                .record(engine.runtime().classify(size as u64));
            live[index].resize(size);
        } else {
            let index = rng.below(live.len() as u64) as usize;
            live.swap_remove(index);
        }
        tally.operations += 1;
    }
    tally
}

fn merge_stats(total: &mut MemoryStats, part: MemoryStats) {
    total.total_allocated += part.total_allocated;
    total.total_freed += part.total_freed;
    total.current_usage += part.current_usage;
    total.peak_usage = total.peak_usage.max(part.peak_usage);
    total.allocation_count += part.allocation_count;
    total.deallocation_count += part.deallocation_count;
    total.reallocation_count += part.reallocation_count;
}

fn report<C: MemoryConfig>(
    options: StressOptions,
    shared_engine: bool,
    start: Instant,
    tally: Tally,
    stats: MemoryStats,
) -> StressReport {
    StressReport {
        preset: C::DESCRIPTOR.name,
        threads: options.threads.max(1),
        iterations: options.iterations,
        shared_engine,
        operations: tally.operations,
        elapsed_us: start.elapsed().as_micros(),
        size_classes: tally.classes,
        stats,
    }
}

/// All threads churn one engine.
fn stress_shared<C: MemoryConfig>(options: StressOptions) -> StressReport
where
    MemoryManager<C>: Sync,
{
    let engine = MemoryManager::<C>::new().with_runtime_config(&STRESS_RUNTIME);
    let start = Instant::now();
    let parts: Vec<Tally> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..options.threads.max(1))
            .map(|t| {
                let engine = &engine;
                scope.spawn(move || churn(engine, options.seed ^ t as u64, options.iterations))
            })
            .collect();
        handles.into_iter().filter_map(|h| h.join().ok()).collect()
    });
    let mut tally = Tally::default();
    for part in parts {
        tally.operations += part.operations;
        tally.classes.merge(part.classes);
    }
    report::<C>(options, true, start, tally, engine.stats())
}

/// Each thread churns an engine of its own; counters are summed afterwards.
fn stress_private<C: MemoryConfig>(options: StressOptions) -> StressReport {
    let start = Instant::now();
    let parts: Vec<(Tally, MemoryStats)> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..options.threads.max(1))
            .map(|t| {
                scope.spawn(move || {
                    let engine = MemoryManager::<C>::new().with_runtime_config(&STRESS_RUNTIME);
                    let part = churn(&engine, options.seed ^ t as u64, options.iterations);
                    (part, engine.stats())
                })
            })
            .collect();
        handles.into_iter().filter_map(|h| h.join().ok()).collect()
    });
    let mut tally = Tally::default();
    let mut stats = MemoryStats::default();
    for (part, part_stats) in parts {
        tally.operations += part.operations;
        tally.classes.merge(part.classes);
        merge_stats(&mut stats, part_stats);
    }
    report::<C>(options, false, start, tally, stats)
}

/// Run the stress workload against the named preset.
pub fn run_stress(preset: &str, options: StressOptions) -> Result<StressReport, HarnessError> {
    let descriptor = ConfigDescriptor::preset(preset)
        .ok_or_else(|| HarnessError::UnknownPreset(preset.to_string()))?;
    let report = match descriptor.name {
        "default" => stress_shared::<DefaultConfig>(options),
        "high_performance" => stress_private::<HighPerformanceConfig>(options),
        "debug" => stress_shared::<DebugConfig>(options),
        "embedded" => stress_private::<EmbeddedConfig>(options),
        "thread_safe" => stress_shared::<ThreadSafeConfig>(options),
        other => return Err(HarnessError::UnknownPreset(other.to_string())),
    };
    Ok(report)
}
