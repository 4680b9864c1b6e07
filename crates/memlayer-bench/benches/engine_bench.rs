//! Allocation engine benchmarks.
//!
//! Measures alloc/free round trips for each preset against the untracked
//! fast path and raw libc.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use memlayer_core::{FastManager, MemoryManager};
use memlayer_policy::{DebugConfig, HighPerformanceConfig, MemoryConfig, ThreadSafeConfig};

const SIZES: [usize; 3] = [16, 256, 4096];

fn round_trip<C: MemoryConfig>(engine: &MemoryManager<C>, size: usize) {
    if let Some(ptr) = engine.alloc(criterion::black_box(size), false) {
        // SAFETY: `ptr` was just allocated by this engine without padding.
        unsafe { engine.free(ptr.as_ptr(), false) };
    }
}

fn bench_presets(c: &mut Criterion) {
    let high_performance = MemoryManager::<HighPerformanceConfig>::new();
    let thread_safe = MemoryManager::<ThreadSafeConfig>::new();
    let debug = MemoryManager::<DebugConfig>::new();
    let fast = FastManager::new();

    let mut group = c.benchmark_group("alloc_free");
    for size in SIZES {
        group.bench_with_input(BenchmarkId::new("libc", size), &size, |b, &size| {
            b.iter(|| {
                // SAFETY: plain malloc/free pair.
                unsafe {
                    let ptr = libc::malloc(criterion::black_box(size));
                    libc::free(ptr);
                }
            });
        });
        group.bench_with_input(BenchmarkId::new("fast", size), &size, |b, &size| {
            b.iter(|| {
                if let Some(ptr) = fast.alloc(criterion::black_box(size), false) {
                    // SAFETY: `ptr` came from this manager.
                    unsafe { fast.free(ptr.as_ptr(), false) };
                }
            });
        });
        group.bench_with_input(
            BenchmarkId::new("high_performance", size),
            &size,
            |b, &size| b.iter(|| round_trip(&high_performance, size)),
        );
        group.bench_with_input(BenchmarkId::new("thread_safe", size), &size, |b, &size| {
            b.iter(|| round_trip(&thread_safe, size));
        });
        group.bench_with_input(BenchmarkId::new("debug", size), &size, |b, &size| {
            b.iter(|| round_trip(&debug, size));
        });
    }
    group.finish();
}

fn bench_aligned(c: &mut Criterion) {
    let engine = MemoryManager::<ThreadSafeConfig>::new();
    let mut group = c.benchmark_group("alloc_aligned");
    for alignment in [16, 64, 4096] {
        group.bench_with_input(
            BenchmarkId::from_parameter(alignment),
            &alignment,
            |b, &alignment| {
                b.iter(|| {
                    if let Some(ptr) = engine.alloc_aligned(256, criterion::black_box(alignment)) {
                        // SAFETY: `ptr` came from `alloc_aligned` on this engine.
                        unsafe { engine.free_aligned(ptr.as_ptr()) };
                    }
                });
            },
        );
    }
    group.finish();
}

fn bench_realloc_growth(c: &mut Criterion) {
    let engine = MemoryManager::<ThreadSafeConfig>::new();
    c.bench_function("realloc_grow_16_to_4096", |b| {
        b.iter(|| {
            let Some(mut ptr) = engine.alloc(16, false) else {
                return;
            };
            let mut size = 16;
            while size < 4096 {
                size *= 2;
                // SAFETY: `ptr` is live and was allocated without padding.
                match unsafe { engine.realloc(ptr.as_ptr(), size, false) } {
                    Some(grown) => ptr = grown,
                    None => break,
                }
            }
            // SAFETY: `ptr` is the latest live block.
            unsafe { engine.free(ptr.as_ptr(), false) };
        });
    });
}

criterion_group!(benches, bench_presets, bench_aligned, bench_realloc_growth);
criterion_main!(benches);
