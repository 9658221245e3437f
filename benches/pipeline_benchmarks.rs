use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::time::Duration;

use framepipe::prelude::*;

fn bench_channel_handoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_handoff");

    for capacity in [8, 64, 512].iter() {
        group.throughput(Throughput::Elements(10_000));

        group.bench_with_input(
            BenchmarkId::new("send_recv", capacity),
            capacity,
            |b, &capacity| {
                b.iter(|| {
                    tokio::runtime::Runtime::new().unwrap().block_on(async {
                        let channel = BoundedChannel::new(capacity);
                        for i in 0..10_000i64 {
                            channel.send(black_box(i)).unwrap();
                            black_box(channel.recv(Duration::from_millis(1)).await);
                        }
                    })
                });
            },
        );
    }

    group.finish();
}

fn bench_overflow_policy(c: &mut Criterion) {
    let mut group = c.benchmark_group("overflow_policy");
    group.throughput(Throughput::Elements(10_000));

    group.bench_function("drop_oldest_under_pressure", |b| {
        b.iter(|| {
            let channel = BoundedChannel::new(black_box(16));
            for i in 0..10_000i64 {
                channel.send(black_box(i)).unwrap();
            }
            black_box(channel.stats());
        });
    });

    group.finish();
}

fn bench_end_to_end(c: &mut Criterion) {
    let mut group = c.benchmark_group("end_to_end");

    for size in [100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));

        group.bench_with_input(BenchmarkId::new("three_stage", size), size, |b, &size| {
            b.iter(|| {
                tokio::runtime::Runtime::new().unwrap().block_on(async {
                    let sink = CountSink::<i64>::new();
                    let counter = sink.clone();

                    let mut graph = PipelineGraph::new()
                        .control_poll_interval(Duration::from_millis(5));
                    graph.add_stage("source", RangeSource::new(0..size)).unwrap();
                    graph
                        .add_stage("double", MapStage::new(|x: i64| black_box(x * 2)))
                        .unwrap();
                    graph.add_stage("count", sink).unwrap();
                    graph.link("source", "double", size as usize).unwrap();
                    graph.link("double", "count", size as usize).unwrap();

                    graph.start().unwrap();
                    graph.join(Duration::from_secs(10)).await.unwrap();
                    black_box(counter.count());
                })
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_channel_handoff,
    bench_overflow_policy,
    bench_end_to_end
);
criterion_main!(benches);
