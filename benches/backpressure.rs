use continuous_pipeline::{
    AdmissionGate, AdmissionOrder, BoundedSink, BoxError, Demand, Pipeline, PollingSource,
    SourceConfig, WorkerConfig,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

fn benchmark_gate_admit_release(c: &mut Criterion) {
    for order in [AdmissionOrder::Fifo, AdmissionOrder::Lifo] {
        c.bench_function(&format!("gate_{order:?}_admit_release_1000").to_lowercase(), |b| {
            b.iter(|| {
                let gate = AdmissionGate::with_order(10, order);
                let demand = Demand::new();
                for _ in 0..1000 {
                    gate.admit(demand.granter());
                }
                for _ in 0..1000 {
                    gate.release();
                }
                black_box(demand.pending());
            });
        });
    }
}

fn benchmark_slow_consumer(c: &mut Criterion) {
    let rt = Runtime::new().expect("Runtime failed");
    for limit in [1, 10, 100] {
        c.bench_function(&format!("slow_consumer_limit_{limit}_500_msgs"), |b| {
            b.iter(|| {
                let served = Arc::new(AtomicUsize::new(0));
                let source = PollingSource::new(
                    SourceConfig::default().with_batch_size(100).with_auto_stop(true),
                    move |count: usize| {
                        let start = served.fetch_add(count, Ordering::SeqCst).min(500);
                        let end = (start + count).min(500);
                        async move { Ok::<_, BoxError>((start..end).collect::<Vec<usize>>()) }
                    },
                )
                .expect("Source failed");

                let sink = BoundedSink::new(
                    WorkerConfig::default().with_concurrency_limit(limit),
                    |item: usize| async move {
                        tokio::time::sleep(Duration::from_micros(100)).await;
                        black_box(item);
                        Ok::<_, BoxError>(())
                    },
                )
                .expect("Sink failed");

                rt.block_on(Pipeline::from_source(source).sink(sink).run())
                    .expect("Pipeline failed");
            });
        });
    }
}

criterion_group!(
    name = benches;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(15))
        .sample_size(20);
    targets = benchmark_gate_admit_release, benchmark_slow_consumer
);
criterion_main!(benches);
