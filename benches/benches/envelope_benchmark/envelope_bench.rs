use std::hint::black_box;

use courier::{transport::memory::topic_matches, Envelope};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Serialize, Deserialize)]
struct OrderCreated {
    id: u64,
    customer: String,
    lines: Vec<u32>,
}

fn order(lines: usize) -> OrderCreated {
    OrderCreated {
        id: 42,
        customer: "customer-0042".to_string(),
        lines: (0..lines as u32).collect(),
    }
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_encode");
    for lines in [1usize, 16, 256] {
        let envelope = Envelope::new(order(lines))
            .with_message_id("msg-1")
            .with_correlation_id(Some("corr-1".to_string()));
        let size = envelope.encode().map(|b| b.len()).unwrap_or(0);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(lines), &envelope, |b, env| {
            b.iter(|| black_box(env.encode().unwrap()))
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_decode");
    for lines in [1usize, 16, 256] {
        let payload = Envelope::new(order(lines)).encode().unwrap();
        group.throughput(Throughput::Bytes(payload.len() as u64));

        group.bench_with_input(BenchmarkId::new("typed", lines), &payload, |b, p| {
            b.iter(|| black_box(Envelope::<OrderCreated>::decode(p).unwrap()))
        });
        // Так подписчик разбирает доставку до передачи обработчику
        group.bench_with_input(BenchmarkId::new("value", lines), &payload, |b, p| {
            b.iter(|| {
                let env = Envelope::<Value>::decode(p).unwrap();
                black_box(env.decode_message::<OrderCreated>().unwrap())
            })
        });
    }
    group.finish();
}

fn bench_topic_matches(c: &mut Criterion) {
    let cases = [
        ("literal", "order.created.eu", "order.created.eu"),
        ("star", "order.*.eu", "order.created.eu"),
        ("hash_tail", "order.#", "order.created.eu.berlin.store"),
        ("hash_head", "#.store", "order.created.eu.berlin.store"),
        ("miss", "invoice.#.eu", "order.created.eu.berlin.store"),
    ];
    let mut group = c.benchmark_group("topic_matches");
    for (name, pattern, key) in cases {
        group.bench_function(name, |b| {
            b.iter(|| black_box(topic_matches(black_box(pattern), black_box(key))))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_topic_matches);
criterion_main!(benches);
