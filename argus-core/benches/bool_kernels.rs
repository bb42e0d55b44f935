//! Dispatched vs reference boolean kernels over evaluation-sized chunks.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use argus_core::structures::simd;

fn bench_bool_kernels(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(42);
    let len = 8192;
    let lhs: Vec<bool> = (0..len).map(|_| rng.gen_bool(0.5)).collect();
    let rhs: Vec<bool> = (0..len).map(|_| rng.gen_bool(0.5)).collect();
    let sparse: Vec<bool> = (0..len).map(|i| i == len - 1).collect();

    let mut group = c.benchmark_group("bool_kernels");

    group.bench_function("all_false/8192", |b| {
        b.iter(|| simd::all_false(black_box(&sparse)))
    });

    group.bench_function("and_bool/8192", |b| {
        b.iter_batched(
            || lhs.clone(),
            |mut out| simd::and_bool(black_box(&mut out), black_box(&rhs)),
            criterion::BatchSize::SmallInput,
        )
    });

    group.bench_function("invert_bool/8192", |b| {
        b.iter_batched(
            || lhs.clone(),
            |mut out| simd::invert_bool(black_box(&mut out)),
            criterion::BatchSize::SmallInput,
        )
    });

    group.bench_function("get_bitset_block/8192", |b| {
        b.iter(|| {
            let mut acc = 0u64;
            for block in lhs.chunks_exact(64) {
                acc ^= simd::get_bitset_block(black_box(block));
            }
            acc
        })
    });

    let needles: Vec<i32> = (0..16).collect();
    group.bench_function("find_term_i32/16", |b| {
        b.iter(|| simd::find_term(black_box(&needles), black_box(-1)))
    });

    group.finish();
}

criterion_group!(benches, bench_bool_kernels);
criterion_main!(benches);
