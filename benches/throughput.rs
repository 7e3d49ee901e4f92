use continuous_pipeline::{
    BoundedSink, BoundedStage, BoxError, Fanout, Pipeline, PollingSource, SourceConfig,
    WorkerConfig,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

/// Source that yields `total` payloads in batches, then auto-stops
fn payload_source(total: usize, batch_size: usize) -> PollingSource<Vec<u8>> {
    let served = Arc::new(AtomicUsize::new(0));
    PollingSource::new(
        SourceConfig::default()
            .with_batch_size(batch_size)
            .with_auto_stop(true),
        move |count: usize| {
            let start = served.fetch_add(count, Ordering::SeqCst).min(total);
            let end = (start + count).min(total);
            async move { Ok::<_, BoxError>((start..end).map(|i| vec![i as u8; 64]).collect::<Vec<_>>()) }
        },
    )
    .expect("Source failed")
}

fn discard_sink(limit: usize) -> BoundedSink<Vec<u8>> {
    BoundedSink::new(
        WorkerConfig::default().with_concurrency_limit(limit),
        |data: Vec<u8>| async move {
            black_box(data);
            Ok::<_, BoxError>(())
        },
    )
    .expect("Sink failed")
}

fn passthrough_stage(limit: usize) -> BoundedStage<Vec<u8>, Vec<u8>> {
    BoundedStage::new(
        WorkerConfig::default().with_concurrency_limit(limit),
        |data: Vec<u8>| async move { Ok::<_, BoxError>(Fanout::one(data)) },
    )
    .expect("Stage failed")
}

fn benchmark_source_to_sink(c: &mut Criterion) {
    let rt = Runtime::new().expect("Runtime failed");
    c.bench_function("source_to_sink_1000_msgs", |b| {
        b.iter(|| {
            rt.block_on(
                Pipeline::from_source(payload_source(1000, 50))
                    .sink(discard_sink(10))
                    .run(),
            )
            .expect("Pipeline failed");
        });
    });
}

fn benchmark_three_stage_throughput(c: &mut Criterion) {
    let rt = Runtime::new().expect("Runtime failed");
    c.bench_function("three_stage_1000_msgs", |b| {
        b.iter(|| {
            rt.block_on(
                Pipeline::from_source(payload_source(1000, 50))
                    .stage(passthrough_stage(10))
                    .stage(passthrough_stage(10))
                    .stage(passthrough_stage(10))
                    .sink(discard_sink(10))
                    .run(),
            )
            .expect("Pipeline failed");
        });
    });
}

fn benchmark_high_throughput(c: &mut Criterion) {
    let rt = Runtime::new().expect("Runtime failed");
    c.bench_function("high_throughput_5000_msgs", |b| {
        b.iter(|| {
            rt.block_on(
                Pipeline::from_source(payload_source(5000, 500))
                    .stage(passthrough_stage(100))
                    .sink(discard_sink(100))
                    .run(),
            )
            .expect("Pipeline failed");
        });
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default().measurement_time(Duration::from_secs(10));
    targets = benchmark_source_to_sink, benchmark_three_stage_throughput, benchmark_high_throughput
);
criterion_main!(benches);
