use criterion::{black_box, criterion_group, criterion_main, Criterion};
use flightq::{
    Accumulator, DeliveryQueue, DeliveryRequest, DeliveryResponse, EndpointConfig, FlushTrigger,
    NullReporter, QueueConfig, Transport, TransportError,
};

use async_trait::async_trait;
use std::time::Duration;

// Accepts every batch without doing any I/O.
#[derive(Debug)]
struct AcceptAll;

#[async_trait]
impl Transport for AcceptAll {
    async fn send(&self, _request: &DeliveryRequest) -> Result<DeliveryResponse, TransportError> {
        Ok(DeliveryResponse::new(200))
    }
}

fn accumulator_push_and_snapshot(c: &mut Criterion) {
    let trigger = FlushTrigger::new(Duration::ZERO, 15);

    c.bench_function("accumulator_push_15_snapshot", |b| {
        b.iter(|| {
            let mut acc = Accumulator::with_capacity(15);
            for n in 0..15u64 {
                let pending = acc.push(black_box(n));
                black_box(trigger.on_push(pending, pending == 1));
            }
            black_box(acc.snapshot_and_clear())
        });
    });
}

fn queue_push_throughput(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let config = QueueConfig::builder()
        .buffer_size(100)
        .primary(EndpointConfig::primary("https://bench.example.com/ingest"))
        .build()
        .unwrap();
    let queue = rt.block_on(async {
        DeliveryQueue::builder(config, AcceptAll).reporter(NullReporter).build()
    });

    c.bench_function("queue_push_buffer_100", |b| {
        b.iter(|| black_box(queue.push(black_box(serde_json::json!({"event": "bench"})))));
    });

    rt.block_on(queue.shutdown());
}

criterion_group!(benches, accumulator_push_and_snapshot, queue_push_throughput);
criterion_main!(benches);
