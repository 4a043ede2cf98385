//! Advisor and allocator overhead per invocation.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use pagecat_core::{BufferAllocator, PageAllocator, TransferPolicy, recommend};

fn bench_recommend(c: &mut Criterion) {
    let policy = TransferPolicy::default();
    let mut group = c.benchmark_group("recommend");

    for block in [None, Some(512u64), Some(4096), Some(6000), Some(1 << 18)] {
        let label = block.map_or_else(|| "stat_failed".to_string(), |b| b.to_string());
        group.bench_with_input(BenchmarkId::new("page_4096", label), &block, |b, &blk| {
            b.iter(|| criterion::black_box(recommend(4096, blk, &policy)));
        });
    }
    group.finish();
}

fn bench_acquire_release(c: &mut Criterion) {
    let allocator = PageAllocator::default();
    let mut group = c.benchmark_group("acquire_release");

    for size in [4096usize, 32 * 1024, 1 << 20] {
        group.bench_with_input(BenchmarkId::new("page_aligned", size), &size, |b, &sz| {
            b.iter(|| {
                let buffer = allocator.acquire(sz).expect("acquire");
                criterion::black_box(buffer.as_ptr());
                buffer.release();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_recommend, bench_acquire_release);
criterion_main!(benches);
