use std::{hint::black_box, sync::Arc};

use courier::{
    CancellationToken, ExchangeConfig, ExchangeKind, MemoryBroker, MessageBus, Publisher,
    QueueConfig, TopologyConfig,
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use tokio::runtime::Runtime;

/// Шина с topic exchange и `queues` очередями, привязанными на `#`.
fn setup(
    rt: &Runtime,
    queues: usize,
) -> (MemoryBroker, MessageBus, Publisher) {
    let broker = MemoryBroker::new();
    let bus = MessageBus::new(Default::default(), Arc::new(broker.connector()));

    let mut exchange = ExchangeConfig::new("bench", ExchangeKind::Topic);
    for i in 0..queues {
        exchange = exchange.with_queue(QueueConfig::new(format!("bench.{i}")).with_routing_key("#"));
    }
    rt.block_on(bus.bootstrap(&TopologyConfig::new(vec![exchange]), &CancellationToken::new()))
        .unwrap();
    let publisher = bus.publisher();
    (broker, bus, publisher)
}

fn bench_publish_fanout(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let token = CancellationToken::new();
    let mut group = c.benchmark_group("publish");

    for queues in [0usize, 1, 10, 100] {
        let (_broker, _bus, publisher) = setup(&rt, queues);
        let (publisher, token) = (&publisher, &token);
        group.bench_with_input(BenchmarkId::new("queues", queues), &queues, |b, _| {
            b.to_async(&rt).iter(|| async move {
                publisher
                    .publish("bench", black_box(&json!({"id": 1})), None, token)
                    .await
                    .unwrap()
            })
        });
    }
    group.finish();
}

/// Публикации из нескольких задач в один топик: все они делят канал из
/// кэша издателя.
fn bench_publish_concurrent(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (_broker, _bus, publisher) = setup(&rt, 1);
    let publisher = Arc::new(publisher);

    c.bench_function("publish_concurrent_16", |b| {
        b.to_async(&rt).iter(|| {
            let publisher = Arc::clone(&publisher);
            async move {
                let mut tasks = Vec::with_capacity(16);
                for id in 0..16 {
                    let publisher = Arc::clone(&publisher);
                    tasks.push(tokio::spawn(async move {
                        publisher
                            .publish("bench", &json!({"id": id}), None, &CancellationToken::new())
                            .await
                    }));
                }
                for task in tasks {
                    task.await.unwrap().unwrap();
                }
            }
        })
    });
}

criterion_group!(benches, bench_publish_fanout, bench_publish_concurrent);
criterion_main!(benches);
