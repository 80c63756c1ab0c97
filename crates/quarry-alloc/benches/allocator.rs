//! Allocator hot-path benchmarks.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use quarry_alloc::{DynamicBufferConfig, DynamicResizableBuffer, HostBacking, RangeAllocator};

/// Deterministic xorshift so runs are comparable.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }
}

fn bench_best_fit_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("best_fit");

    for holes in [16usize, 256, 4096] {
        // Build an allocator with `holes` stranded free ranges.
        let mut alloc = RangeAllocator::new(holes as u64 * 512);
        let mut offsets = Vec::new();
        for _ in 0..holes * 2 {
            if let Some(offset) = alloc.allocate(128, 16) {
                offsets.push(offset);
            }
        }
        for offset in offsets.iter().step_by(2) {
            alloc.free(*offset, 128);
        }

        group.throughput(Throughput::Elements(1));
        group.bench_function(format!("{holes}_holes"), |b| {
            b.iter_batched_ref(
                || alloc.clone(),
                |alloc| {
                    let offset = alloc.allocate(96, 16).unwrap();
                    alloc.free(offset, 96);
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_allocation_churn(c: &mut Criterion) {
    c.bench_function("churn_1000", |b| {
        b.iter(|| {
            let buf = DynamicResizableBuffer::new(
                HostBacking::new(1 << 16),
                DynamicBufferConfig {
                    grow_size: 1 << 16,
                    max_size: 1 << 26,
                },
            );
            let mut rng = Rng(0x9E37_79B9_7F4A_7C15);
            let mut held = Vec::new();
            for _ in 0..1000 {
                let size = 16 + rng.next() % 1024;
                held.push(buf.allocate(size, 16, None).unwrap());
                if rng.next() % 3 == 0 && !held.is_empty() {
                    let idx = (rng.next() as usize) % held.len();
                    held.swap_remove(idx);
                }
            }
        });
    });
}

criterion_group!(benches, bench_best_fit_search, bench_allocation_churn);
criterion_main!(benches);
