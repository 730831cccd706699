//! Benchmarks for the hot paths of the arbiter loop
//!
//! - packet encode and decode for register traffic
//! - typed value extraction from response payloads
//! - identifier bind/resolve through the routing table

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::time::Duration;
use upel_icp::routing::RoutingTable;
use upel_icp::{DataType, Packet, PacketKind, RegisterKey, TransactionId, Value};

fn register_response() -> Packet {
    let mut payload = vec![0x21, 0x22, 0x00, 0x01];
    payload.extend_from_slice(&3.14f64.to_be_bytes());
    Packet::response(PacketKind::RegisterRead, TransactionId::from_raw(42), payload)
}

fn bench_codec(c: &mut Criterion) {
    let packet = register_response();
    let wire = packet.encode().expect("response encodes");

    let mut group = c.benchmark_group("packet_codec");
    group.throughput(Throughput::Bytes(wire.len() as u64));

    group.bench_function("encode_register_response", |b| b.iter(|| black_box(&packet).encode()));
    group.bench_function("decode_register_response", |b| b.iter(|| Packet::decode(black_box(&wire))));
    group.bench_function("encode_register_write", |b| {
        b.iter(|| Packet::register_write(black_box(RegisterKey::new(0x0100, 2)), &Value::Int32(-7)).encode())
    });

    group.finish();
}

fn bench_value_extraction(c: &mut Criterion) {
    let packet = register_response();

    c.bench_function("value_double", |b| b.iter(|| black_box(&packet).value(DataType::Double)));
    c.bench_function("value_string", |b| b.iter(|| black_box(&packet).value(DataType::String)));
}

fn bench_routing(c: &mut Criterion) {
    c.bench_function("bind_resolve", |b| {
        let mut table = RoutingTable::new();
        b.iter(|| {
            let id = table.bind(black_box(1u32), Duration::from_secs(10)).expect("pool has identifiers");
            black_box(table.resolve(id))
        })
    });

    c.bench_function("sweep_full_table", |b| {
        b.iter_batched(
            || {
                let mut table = RoutingTable::new();
                for n in 0..TransactionId::USABLE {
                    let _ = table.bind(n, Duration::ZERO);
                }
                table
            },
            |mut table| black_box(table.sweep_expired(tokio::time::Instant::now())),
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_codec, bench_value_extraction, bench_routing);
criterion_main!(benches);
