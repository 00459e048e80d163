//! Benchmarks `guest::memory::heap::Heap`'s slab allocator under a
//! mixed alloc/free workload: allocation sizes drawn from a
//! log-normal distribution via `rand_distr`, the same idea as
//! benchmarking a general-purpose kernel allocator against a
//! realistic size mix rather than a single fixed size.

use criterion::{Criterion, criterion_group, criterion_main};
use guest::memory::heap::Heap;
use guest::memory::layout::HeapRegion;
use rand::prelude::*;
use rand_distr::LogNormal;

const REGION_SIZE: u64 = 64 * 1024 * 1024;
const MIN_ALLOC: usize = 32;
const MAX_ALLOC: usize = 1 << 16;

/// Leaked once per `criterion_group`, not per iteration: `Heap::init`
/// only needs the region's address range, so every iteration can
/// reuse the same backing buffer instead of allocating a fresh one.
fn region() -> HeapRegion {
    let backing: &'static mut [u8] = vec![0u8; REGION_SIZE as usize].leak();
    HeapRegion {
        start: backing.as_ptr() as u64,
        size: REGION_SIZE,
    }
}

fn sampled_sizes(n: usize, seed: u64) -> Vec<usize> {
    let dist = LogNormal::new(6.0, 1.2).unwrap(); // centered around a few hundred bytes
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let raw = dist.sample(&mut rng).round() as usize;
            raw.clamp(MIN_ALLOC, MAX_ALLOC)
        })
        .collect()
}

fn bench_alloc_only(c: &mut Criterion) {
    let sizes = sampled_sizes(4096, 1);
    let region = region();

    c.bench_function("heap_alloc_only", |b| {
        b.iter(|| {
            let heap = Heap::uninit();
            heap.init(region).unwrap();
            for &size in &sizes {
                criterion::black_box(heap.alloc(size).unwrap());
            }
        });
    });
}

fn bench_alloc_free_churn(c: &mut Criterion) {
    let sizes = sampled_sizes(4096, 2);
    let region = region();

    c.bench_function("heap_alloc_free_churn", |b| {
        b.iter(|| {
            let heap = Heap::uninit();
            heap.init(region).unwrap();
            let mut live = Vec::with_capacity(sizes.len());
            for (i, &size) in sizes.iter().enumerate() {
                let ptr = heap.alloc(size).unwrap();
                live.push((ptr, size));
                if i % 3 == 0 {
                    if let Some((ptr, size)) = live.pop() {
                        heap.free(ptr, size).unwrap();
                    }
                }
            }
            for (ptr, size) in live {
                heap.free(ptr, size).unwrap();
            }
        });
    });
}

criterion_group!(benches, bench_alloc_only, bench_alloc_free_churn);
criterion_main!(benches);
