//! Benchmarks for signal propagation
//!
//! Run with: cargo bench -p tessera-core

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use tessera_core::reactive::{batch, Computed, Signal, Subscription};

/// A chain of `depth` computeds, each adding one to the previous.
fn make_chain(depth: usize) -> (Signal<u64>, Computed<u64>) {
    let source = Signal::new(0u64);
    let mut tail = {
        let source = source.clone();
        Computed::new(move || Ok(source.get()? + 1))
    };
    for _ in 1..depth {
        let previous = tail.clone();
        tail = Computed::new(move || Ok(previous.get()? + 1));
    }
    (source, tail)
}

/// One source read by `width` computeds, all summed by a sink.
fn make_fan(width: usize) -> (Signal<u64>, Computed<u64>) {
    let source = Signal::new(0u64);
    let branches: Vec<Computed<u64>> = (0..width as u64)
        .map(|i| {
            let source = source.clone();
            Computed::new(move || Ok(source.get()? * i))
        })
        .collect();
    let sink = Computed::from_deps(branches, |values: Vec<u64>| Ok(values.iter().sum()));
    (source, sink)
}

fn bench_chain_pull(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagation/chain_pull");

    for depth in [1, 10, 100] {
        let (source, tail) = make_chain(depth);
        let mut next = 0u64;
        group.bench_with_input(BenchmarkId::new("set_then_get", depth), &tail, |b, tail| {
            b.iter(|| {
                next += 1;
                source.set(next).ok();
                black_box(tail.get().ok())
            })
        });
    }

    group.finish();
}

fn bench_chain_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagation/chain_push");

    for depth in [1, 10, 100] {
        let (source, tail) = make_chain(depth);
        let _sub: Option<Subscription> = tail.on(|v| {
            black_box(*v);
        }).ok();
        let mut next = 0u64;
        group.bench_function(BenchmarkId::new("subscribed_set", depth), |b| {
            b.iter(|| {
                next += 1;
                source.set(next).ok();
            })
        });
    }

    group.finish();
}

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagation/fan_out");

    for width in [4, 32, 256] {
        let (source, sink) = make_fan(width);
        let mut next = 0u64;
        group.bench_with_input(BenchmarkId::new("set_then_get", width), &sink, |b, sink| {
            b.iter(|| {
                next += 1;
                source.set(next).ok();
                black_box(sink.get().ok())
            })
        });
    }

    group.finish();
}

fn bench_batch(c: &mut Criterion) {
    let signals: Vec<Signal<u64>> = (0..64).map(Signal::new).collect();
    let total = Computed::from_deps(signals.clone(), |values: Vec<u64>| Ok(values.iter().sum()));
    let _sub = total.on(|v| {
        black_box(*v);
    });

    let mut next = 0u64;
    c.bench_function("propagation/batch_64_writes", |b| {
        b.iter(|| {
            next += 1;
            batch(|| {
                for signal in &signals {
                    signal.set(next).ok();
                }
            });
        })
    });
}

criterion_group!(
    benches,
    bench_chain_pull,
    bench_chain_push,
    bench_fan_out,
    bench_batch
);
criterion_main!(benches);
