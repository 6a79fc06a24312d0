//! Benchmarks for tracing, lowering and evaluation.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use polystage::prelude::*;

/// `B[x, y] = popcount(A[x, y])` as a tagged loop nest.
fn popcount() -> Schedule {
    let placeholders = [
        placeholder("A", &[32, 32]).dtype(ValueType::UInt(32)),
        placeholder("B", &[32, 32]).dtype(ValueType::UInt(32)),
    ];
    create_schedule(&BuildConfig::default(), "popcount", &placeholders, |kb, ts| {
        let (a, b) = (ts[0].clone(), ts[1].clone());
        kb.for_each(0, 32, 1, Some("C"), |kb, x| {
            kb.for_each(0, 32, 1, None, |kb, y| {
                let xy = [x.clone(), y];
                kb.store(&b, &xy, 0)?;
                kb.for_each(0, 32, 1, None, |kb, i| kb.store(&b, &xy, b.at(&xy)? + a.at(&xy)?.bit(i)?))
            })
        })?;
        Ok(vec![])
    })
    .unwrap()
}

fn scheduled() -> Schedule {
    let mut s = popcount();
    let x = s.stage("C").unwrap().axis(0).unwrap();
    let y = s.stage("C").unwrap().axis(1).unwrap();
    let fused = s.fuse(x, y).unwrap();
    let (_, inner) = s.split(fused, 8).unwrap();
    s.unroll(inner, 4).unwrap();
    s
}

/// Benchmark tracing a kernel into a schedule.
fn bench_tracing(c: &mut Criterion) {
    c.bench_function("trace_popcount", |b| b.iter(|| black_box(popcount())));
}

/// Benchmark lowering with and without loop transformations.
fn bench_lowering(c: &mut Criterion) {
    let plain = popcount();
    let transformed = scheduled();

    c.bench_function("lower_popcount", |b| b.iter(|| lower(black_box(&plain)).unwrap()));
    c.bench_function("lower_popcount_fused_split", |b| b.iter(|| lower(black_box(&transformed)).unwrap()));
    c.bench_function("print_popcount_fused_split", |b| {
        let kernel = lower(&transformed).unwrap();
        b.iter(|| black_box(&kernel).to_string())
    });
}

/// Benchmark the reference evaluator.
fn bench_evaluation(c: &mut Criterion) {
    let exe = build(&scheduled()).unwrap();
    let input: Vec<i64> = (0..1024).map(|v| (v * 2654435761i64) & 0xffff_ffff).collect();

    c.bench_function("run_popcount", |b| {
        b.iter(|| {
            let mut args = vec![
                HostArray::from_ints(ValueType::UInt(32), &[32, 32], &input).unwrap(),
                HostArray::new(ValueType::UInt(32), &[32, 32]).unwrap(),
            ];
            exe.run(black_box(&mut args)).unwrap();
            args
        })
    });
}

criterion_group!(benches, bench_tracing, bench_lowering, bench_evaluation);
criterion_main!(benches);
