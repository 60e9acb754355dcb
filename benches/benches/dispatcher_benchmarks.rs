use std::{hint::black_box, sync::Arc};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use pingpong::{
    protocol::{decode_command, encode_command, encode_response},
    session::{rgb_payload, weight_payload},
    Command, CommandType, DeviceRegistry, DeviceScope, Dispatcher, Payload, RangePolicy,
};

fn dispatcher(scope: DeviceScope) -> Dispatcher {
    Dispatcher::with_seed(
        Arc::new(DeviceRegistry::new(scope)),
        RangePolicy::PassThrough,
        1,
    )
}

fn commands() -> Vec<(&'static str, Command)> {
    vec![
        (
            "rgb_set",
            Command::new(CommandType::RgbSet, rgb_payload(10, 20, 30), "bench"),
        ),
        (
            "temperature_read",
            Command::new(CommandType::TemperatureRead, Payload::new(), "bench"),
        ),
        (
            "weight_measure",
            Command::new(CommandType::WeightMeasure, weight_payload(1200), "bench"),
        ),
        (
            "unknown",
            Command::new(CommandType::from("Foo"), Payload::new(), "bench"),
        ),
    ]
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    for scope in [DeviceScope::Shared, DeviceScope::PerSession] {
        let d = dispatcher(scope);
        for (name, command) in commands() {
            group.bench_with_input(
                BenchmarkId::new(format!("{scope:?}"), name),
                &command,
                |b, command| b.iter(|| black_box(d.dispatch(black_box(command)))),
            );
        }
    }
    group.finish();
}

/// Полный путь респондера без транспорта: разбор, диспетчер, кодирование.
fn bench_decode_dispatch_encode(c: &mut Criterion) {
    let d = dispatcher(DeviceScope::Shared);
    let raw = encode_command(&Command::new(
        CommandType::RgbSet,
        rgb_payload(1, 2, 3),
        "ping_0123456789abcdef",
    ))
    .unwrap();

    c.bench_function("decode_dispatch_encode", |b| {
        b.iter(|| {
            let command = decode_command(black_box(&raw)).unwrap();
            let response = d.dispatch(&command);
            black_box(encode_response(&response).unwrap())
        })
    });
}

criterion_group!(benches, bench_dispatch, bench_decode_dispatch_encode);
criterion_main!(benches);
