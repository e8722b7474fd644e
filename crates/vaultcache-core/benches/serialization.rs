//! Benchmarks comparing the bundled serializer backends.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde::{Deserialize, Serialize};
use std::hint::black_box;
use vaultcache_core::{JsonSerializer, Serializer};

#[cfg(feature = "msgpack")]
use vaultcache_core::MsgPackSerializer;

#[cfg(feature = "bincode")]
use vaultcache_core::BincodeSerializer;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TestData {
    id: u64,
    name: String,
    values: Vec<i32>,
    metadata: std::collections::HashMap<String, String>,
}

impl TestData {
    fn small() -> Self {
        Self {
            id: 12345,
            name: "test".to_string(),
            values: vec![1, 2, 3],
            metadata: std::collections::HashMap::new(),
        }
    }

    fn medium() -> Self {
        let mut metadata = std::collections::HashMap::new();
        for i in 0..10 {
            metadata.insert(format!("key_{i}"), format!("value_{i}"));
        }
        Self {
            id: 12345,
            name: "test medium data structure".to_string(),
            values: (0..100).collect(),
            metadata,
        }
    }

    fn large() -> Self {
        let mut metadata = std::collections::HashMap::new();
        for i in 0..100 {
            metadata.insert(format!("key_{i}"), "x".repeat(100));
        }
        Self {
            id: 12345,
            name: "test large data structure with lots of content".to_string(),
            values: (0..1000).collect(),
            metadata,
        }
    }
}

fn bench_serializers(c: &mut Criterion) {
    let test_cases = vec![
        ("small", TestData::small()),
        ("medium", TestData::medium()),
        ("large", TestData::large()),
    ];

    let mut group = c.benchmark_group("serialize");

    for (name, data) in &test_cases {
        group.bench_with_input(BenchmarkId::new("json", name), data, |b, data| {
            let serializer = JsonSerializer;
            b.iter(|| {
                let bytes = serializer.serialize(black_box(data)).unwrap();
                black_box(bytes);
            });
        });

        #[cfg(feature = "msgpack")]
        group.bench_with_input(BenchmarkId::new("msgpack", name), data, |b, data| {
            let serializer = MsgPackSerializer;
            b.iter(|| {
                let bytes = serializer.serialize(black_box(data)).unwrap();
                black_box(bytes);
            });
        });

        #[cfg(feature = "bincode")]
        group.bench_with_input(BenchmarkId::new("bincode", name), data, |b, data| {
            let serializer = BincodeSerializer;
            b.iter(|| {
                let bytes = serializer.serialize(black_box(data)).unwrap();
                black_box(bytes);
            });
        });
    }

    group.finish();
}

fn bench_deserializers(c: &mut Criterion) {
    let test_cases = vec![
        ("small", TestData::small()),
        ("medium", TestData::medium()),
        ("large", TestData::large()),
    ];

    let mut group = c.benchmark_group("deserialize");

    for (name, data) in &test_cases {
        let json_serializer = JsonSerializer;
        let json_bytes = json_serializer.serialize(&data).unwrap();
        group.throughput(Throughput::Bytes(json_bytes.len() as u64));
        group.bench_with_input(BenchmarkId::new("json", name), &json_bytes, |b, bytes| {
            b.iter(|| {
                let result: TestData = json_serializer.deserialize(black_box(bytes)).unwrap();
                black_box(result);
            });
        });

        #[cfg(feature = "msgpack")]
        {
            let msgpack_serializer = MsgPackSerializer;
            let msgpack_bytes = msgpack_serializer.serialize(&data).unwrap();
            group.throughput(Throughput::Bytes(msgpack_bytes.len() as u64));
            group.bench_with_input(
                BenchmarkId::new("msgpack", name),
                &msgpack_bytes,
                |b, bytes| {
                    b.iter(|| {
                        let result: TestData =
                            msgpack_serializer.deserialize(black_box(bytes)).unwrap();
                        black_box(result);
                    });
                },
            );
        }

        #[cfg(feature = "bincode")]
        {
            let bincode_serializer = BincodeSerializer;
            let bincode_bytes = bincode_serializer.serialize(&data).unwrap();
            group.throughput(Throughput::Bytes(bincode_bytes.len() as u64));
            group.bench_with_input(
                BenchmarkId::new("bincode", name),
                &bincode_bytes,
                |b, bytes| {
                    b.iter(|| {
                        let result: TestData =
                            bincode_serializer.deserialize(black_box(bytes)).unwrap();
                        black_box(result);
                    });
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_serializers, bench_deserializers);
criterion_main!(benches);
