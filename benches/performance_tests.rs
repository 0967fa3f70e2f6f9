//! Performance benchmarks for packetlog

use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use packetlog::client::PacketClient;
use packetlog::config::ServerConfig;
use packetlog::server::{LogStore, PacketServer};
use packetlog::types::{PacketCodec, RemainderPolicy};
use std::time::Duration;
use tempfile::tempdir;
use tokio::runtime::Runtime;
use tokio_util::codec::Decoder;

fn bench_config(dir: &std::path::Path) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.server.bind_address = "127.0.0.1".to_string();
    config.server.port = 0;
    config.storage.data_file = dir.join("bench-data");
    config.timestamp.enabled = false;
    config
}

/// Benchmark packets sent by a single client
fn bench_single_client_throughput(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("single_client_throughput");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(10);

    for packet_count in [10, 100, 500].iter() {
        group.throughput(Throughput::Elements(*packet_count as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(packet_count),
            packet_count,
            |b, &count| {
                b.to_async(&rt).iter(|| async move {
                    let temp_dir = tempdir().unwrap();
                    let server = PacketServer::bind(bench_config(temp_dir.path())).await.unwrap();
                    let address = server.local_addr().unwrap().to_string();
                    let handle = server.shutdown_handle();
                    let server_task = tokio::spawn(server.run_until(std::future::pending()));

                    let mut client = PacketClient::connect(&address).await.unwrap();
                    for i in 0..count {
                        client
                            .send_packet(format!("bench packet {}\n", i).as_bytes())
                            .await
                            .unwrap();
                    }

                    client.close().await.unwrap();
                    handle.shutdown();
                    server_task.await.unwrap().unwrap();
                });
            },
        );
    }

    group.finish();
}

/// Benchmark concurrent clients contending for the log
fn bench_concurrent_clients(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("concurrent_clients");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(10);

    for client_count in [5, 10, 20].iter() {
        group.bench_with_input(
            BenchmarkId::new("clients", client_count),
            client_count,
            |b, &num_clients| {
                b.to_async(&rt).iter(|| async move {
                    let temp_dir = tempdir().unwrap();
                    let server = PacketServer::bind(bench_config(temp_dir.path())).await.unwrap();
                    let address = server.local_addr().unwrap().to_string();
                    let handle = server.shutdown_handle();
                    let server_task = tokio::spawn(server.run_until(std::future::pending()));

                    let mut handles = vec![];
                    for i in 0..num_clients {
                        let address = address.clone();
                        handles.push(tokio::spawn(async move {
                            let mut client = PacketClient::connect(&address).await.unwrap();
                            for j in 0..20 {
                                client
                                    .send_packet(format!("client {} packet {}\n", i, j).as_bytes())
                                    .await
                                    .unwrap();
                            }
                            client.close().await.unwrap();
                        }));
                    }

                    for handle in handles {
                        handle.await.unwrap();
                    }

                    handle.shutdown();
                    server_task.await.unwrap().unwrap();
                });
            },
        );
    }

    group.finish();
}

/// Benchmark append-and-echo against a growing log
fn bench_store_append(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("store_append");
    group.sample_size(20);

    for size in [64usize, 1024, 16 * 1024].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("packet_bytes", size), size, |b, &size| {
            let temp_dir = tempdir().unwrap();
            let store = rt
                .block_on(LogStore::create(temp_dir.path().join("store"), false))
                .unwrap();
            let mut packet = vec![b'x'; size - 1];
            packet.push(b'\n');

            b.to_async(&rt).iter(|| async {
                store.append_and_echo(&packet).await.unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark packet framing
fn bench_packet_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_framing");

    let mut pipelined = Vec::new();
    for i in 0..100 {
        pipelined.extend_from_slice(format!("pipelined packet {}\n", i).as_bytes());
    }
    group.throughput(Throughput::Bytes(pipelined.len() as u64));

    group.bench_function("decode_pipelined", |b| {
        b.iter(|| {
            let mut codec = PacketCodec::new(1024 * 1024, RemainderPolicy::Preserve);
            let mut buf = BytesMut::from(&pipelined[..]);
            let mut count = 0;
            while let Some(_packet) = codec.decode(&mut buf).unwrap() {
                count += 1;
            }
            assert_eq!(count, 100);
        })
    });

    group.bench_function("decode_split_reads", |b| {
        b.iter(|| {
            let mut codec = PacketCodec::new(1024 * 1024, RemainderPolicy::Preserve);
            let mut buf = BytesMut::new();
            let mut count = 0;
            for chunk in pipelined.chunks(7) {
                buf.extend_from_slice(chunk);
                while let Some(_packet) = codec.decode(&mut buf).unwrap() {
                    count += 1;
                }
            }
            assert_eq!(count, 100);
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_single_client_throughput,
    bench_concurrent_clients,
    bench_store_append,
    bench_packet_framing
);
criterion_main!(benches);
