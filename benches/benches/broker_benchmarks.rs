use std::hint::black_box;

use bytes::Bytes;
use criterion::{criterion_group, criterion_main, Criterion};
use pingpong::Broker;

fn bench_publish_no_subscribers(c: &mut Criterion) {
    let broker = Broker::default();
    c.bench_function("publish_0_subs", |b| {
        b.iter(|| black_box(broker.publish("ping/command", Bytes::from_static(b"{}"))))
    });
}

fn bench_publish_exact(c: &mut Criterion) {
    let broker = Broker::new(4096);
    let mut sub = broker.subscribe("pong/s1/response");
    c.bench_function("publish_exact_1_sub", |b| {
        b.iter(|| {
            broker.publish("pong/s1/response", Bytes::from_static(b"{}"));
            black_box(sub.try_recv().ok())
        })
    });
}

fn bench_publish_pattern(c: &mut Criterion) {
    let broker = Broker::new(4096);
    let mut sub = broker.psubscribe("pong/*/response").unwrap();
    c.bench_function("publish_pattern_1_sub", |b| {
        b.iter(|| {
            broker.publish("pong/s1/response", Bytes::from_static(b"{}"));
            black_box(sub.try_recv().ok())
        })
    });
}

criterion_group!(
    benches,
    bench_publish_no_subscribers,
    bench_publish_exact,
    bench_publish_pattern
);
criterion_main!(benches);
