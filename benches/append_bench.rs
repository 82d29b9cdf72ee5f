// Log append and read benchmarks for streamlog

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use streamlog::{LogAppender, Options};
use tempfile::TempDir;

fn bench_options() -> Options {
    Options::default().segment_size(4 * 1024 * 1024).preallocate(true)
}

fn benchmark_sequential_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential_append");

    for size in [100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let temp_dir = TempDir::new().unwrap();
                let log: LogAppender<String> = LogAppender::open(temp_dir.path(), bench_options()).unwrap();

                for i in 0..size {
                    log.append(&format!("event{:08}", i)).unwrap();
                }

                black_box(&log);
            });
        });
    }

    group.finish();
}

fn benchmark_payload_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("append_payload_size");

    for payload_size in [64usize, 1024, 16 * 1024].iter() {
        group.throughput(Throughput::Bytes(*payload_size as u64 * 1000));
        group.bench_with_input(BenchmarkId::from_parameter(payload_size), payload_size, |b, &payload_size| {
            let payload = vec![0x5Au8; payload_size];
            b.iter(|| {
                let temp_dir = TempDir::new().unwrap();
                let log: LogAppender<Vec<u8>> = LogAppender::open(temp_dir.path(), bench_options()).unwrap();

                for _ in 0..1000 {
                    log.append(&payload).unwrap();
                }

                black_box(&log);
            });
        });
    }

    group.finish();
}

fn benchmark_random_get(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let log: LogAppender<String> = LogAppender::open(temp_dir.path(), bench_options()).unwrap();
    let addresses: Vec<u64> = (0..100_000).map(|i| log.append(&format!("event{:08}", i)).unwrap()).collect();
    log.flush().unwrap();

    c.bench_function("random_get", |b| {
        use rand::Rng;
        let mut rng = rand::rng();
        b.iter(|| {
            let address = addresses[rng.random_range(0..addresses.len())];
            black_box(log.get(address).unwrap());
        });
    });
}

fn benchmark_full_scan(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let log: LogAppender<u64> = LogAppender::open(temp_dir.path(), bench_options()).unwrap();
    for i in 0..100_000u64 {
        log.append(&i).unwrap();
    }

    let mut group = c.benchmark_group("scan");
    group.throughput(Throughput::Elements(100_000));
    group.bench_function("full_scan", |b| {
        b.iter(|| {
            let count = log.scanner().unwrap().map(|r| r.unwrap()).count();
            black_box(count);
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    benchmark_sequential_append,
    benchmark_payload_size,
    benchmark_random_get,
    benchmark_full_scan
);
criterion_main!(benches);
