use std::hint::black_box;

use bytes::Bytes;
use criterion::{BatchSize, Criterion};
use streamdrain::{
    error::SinkError,
    pipeline::{BatchAccumulator, BatchSink, SinkForwarder, SizeEstimator},
    types::ItemResult,
    BatchLimits,
};

struct DropSink;

#[async_trait::async_trait]
impl BatchSink for DropSink {
    async fn put_batch(&self, items: &[Bytes]) -> Result<Vec<ItemResult>, SinkError> {
        Ok(vec![ItemResult::Sent; items.len()])
    }
}

fn payloads(count: usize) -> Vec<Bytes> {
    (0..count)
        .map(|i| Bytes::from(format!("{{\"id\":{i},\"body\":\"{}\"}}", "x".repeat(i % 512))))
        .collect()
}

pub fn estimate(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("estimate");
    let estimator = SizeEstimator::default();
    for count in [10, 100, 1000] {
        let input = payloads(count);
        group.throughput(criterion::Throughput::Elements(count as u64));
        group.bench_function(format!("items-{count:04}"), |bencher| {
            bencher.iter(|| estimator.estimate(black_box(&input)));
        });
    }
}

pub fn send_bounded(criterion: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("should be able to make tokio runtime");
    let mut group = criterion.benchmark_group("send_bounded");
    let forwarder = SinkForwarder::new(DropSink);
    let input = payloads(1000);
    group.throughput(criterion::Throughput::Elements(input.len() as u64));

    for (max_count, max_bytes) in [(100, 1 << 20), (1000, 16 << 10), (10, 1 << 20)] {
        let limits = BatchLimits::new(max_count, max_bytes).expect("valid limits");
        group.bench_function(format!("count-{max_count}-bytes-{max_bytes}"), |bencher| {
            bencher
                .to_async(&runtime)
                .iter(|| forwarder.send_bounded(black_box(&input), limits));
        });
    }
}

pub fn accumulate(criterion: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("should be able to make tokio runtime");
    let mut group = criterion.benchmark_group("accumulate");
    let input = payloads(1000);
    group.throughput(criterion::Throughput::Elements(input.len() as u64));

    group.bench_function("add-1000", |bencher| {
        bencher.to_async(&runtime).iter_batched(
            || {
                BatchAccumulator::new(
                    SinkForwarder::new(DropSink),
                    BatchLimits::new(100, 256 << 10).expect("valid limits"),
                )
            },
            |mut accumulator| {
                let input = input.clone();
                async move {
                    for payload in input {
                        accumulator.add(payload).await.expect("drop sink never fails");
                    }
                    accumulator.flush(true).await.expect("drop sink never fails");
                    accumulator.totals()
                }
            },
            BatchSize::SmallInput,
        );
    });
}

criterion::criterion_group!(benches, estimate, send_bounded, accumulate);
criterion::criterion_main!(benches);
