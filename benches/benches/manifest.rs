//! Benchmarks `hvt::manifest::Manifest::validate`/`to_bytes`, the
//! per-guest-boot hot path of parsing and re-serializing the `Solo5/
//! MFT1` note, over manifest sizes drawn with `rand`/`rand_distr` the
//! same way `heap.rs` samples allocation sizes.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use hvt::manifest::{MAX_ENTRIES, Manifest, NAME_SIZE};
use rand::prelude::*;

// Matches `manifest::{HEADER_SIZE, ENTRY_STRIDE}`, which aren't `pub`
// since the layout is this crate's own wire format, not a surface
// other crates should depend on; the fixed numbers are reproduced
// here the same way `guest/src/note.rs` reproduces them on the guest
// side.
const HEADER_SIZE: usize = 8;
const ENTRY_STRIDE: usize = 56;

fn synthetic_manifest_bytes(entry_count: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = Vec::with_capacity(HEADER_SIZE + entry_count * ENTRY_STRIDE);
    out.extend_from_slice(&1u32.to_le_bytes()); // version
    out.extend_from_slice(&(entry_count as u32).to_le_bytes());

    for i in 0..entry_count {
        let mut name = [0u8; NAME_SIZE];
        let text = format!("dev{i}");
        name[..text.len()].copy_from_slice(text.as_bytes());
        out.extend_from_slice(&name);

        let kind = (i % 2) as u32; // alternate BlockBasic/NetBasic
        out.extend_from_slice(&kind.to_le_bytes());

        let mut union = [0u8; 8];
        rng.fill_bytes(&mut union);
        out.extend_from_slice(&union);
        out.extend_from_slice(&0u16.to_le_bytes()); // block_size

        out.extend_from_slice(&(-1i32).to_le_bytes()); // backing
        out.push(0); // attached
        out.resize(out.len().next_multiple_of(ENTRY_STRIDE), 0);
    }

    out
}

fn bench_validate(c: &mut Criterion) {
    let mut group = c.benchmark_group("manifest_validate");
    for &count in &[1usize, 8, MAX_ENTRIES] {
        let bytes = synthetic_manifest_bytes(count, count as u64);
        group.bench_with_input(BenchmarkId::from_parameter(count), &bytes, |b, bytes| {
            b.iter(|| criterion::black_box(Manifest::validate(bytes).unwrap()));
        });
    }
    group.finish();
}

fn bench_to_bytes(c: &mut Criterion) {
    let mut group = c.benchmark_group("manifest_to_bytes");
    for &count in &[1usize, 8, MAX_ENTRIES] {
        let bytes = synthetic_manifest_bytes(count, count as u64);
        let manifest = Manifest::validate(&bytes).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(count), &manifest, |b, manifest| {
            b.iter(|| criterion::black_box(manifest.to_bytes()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_validate, bench_to_bytes);
criterion_main!(benches);
