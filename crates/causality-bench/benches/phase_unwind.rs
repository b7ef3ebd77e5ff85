//! Benchmarks for phase capture and unwind

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use causality_bench::{random_positions, BenchEngine};
use causality_core::PlayerId;
use causality_phase::{Cancellable, EventKind};

fn bench_capture_unwind(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_unwind");
    for count in [1usize, 16, 128] {
        let mut engine = BenchEngine::new(16);
        let positions = random_positions(count, 16, 42);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &positions, |b, positions| {
            b.iter(|| black_box(engine.place_batch(PlayerId(1), positions).unwrap()))
        });
    }
    group.finish();
}

fn bench_cancelled_unwind(c: &mut Criterion) {
    let mut engine = BenchEngine::new(16);
    engine
        .bus
        .register(&engine.tracker, "cancel", Some(EventKind::ChangeBlock), |event, _| {
            event.set_cancelled(true);
            Ok(())
        })
        .unwrap();
    let positions = random_positions(64, 16, 7);

    c.bench_function("packet_unwind_cancelled_64", |b| {
        b.iter(|| black_box(engine.place_batch(PlayerId(1), &positions).unwrap()))
    });
}

criterion_group!(benches, bench_capture_unwind, bench_cancelled_unwind);
criterion_main!(benches);
