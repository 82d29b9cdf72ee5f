// Table index benchmarks for streamlog

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use std::hint::black_box;
use streamlog::{IndexOptions, Range, TableIndex};
use tempfile::TempDir;

const STREAMS: u64 = 1000;
const VERSIONS: u32 = 100;

/// Index with STREAMS x VERSIONS entries, flushed into several disk segments.
fn populated_index(dir: &TempDir, use_bloom_filter: bool) -> TableIndex {
    let options = IndexOptions::default().flush_threshold(20_000).use_bloom_filter(use_bloom_filter);
    let index = TableIndex::open(dir.path(), options).unwrap();
    for version in 0..VERSIONS {
        for stream in 0..STREAMS {
            index.add(stream, version, stream << 32 | version as u64).unwrap();
        }
    }
    index.flush().unwrap();
    index
}

fn benchmark_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_add");

    for size in [1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let temp_dir = TempDir::new().unwrap();
                let index = TableIndex::open(temp_dir.path(), IndexOptions::default()).unwrap();
                for n in 0..size as u32 {
                    index.add(n as u64 % 16, n / 16, n as u64).unwrap();
                }
                black_box(&index);
            });
        });
    }

    group.finish();
}

fn benchmark_point_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_get");

    for use_bloom_filter in [true, false] {
        let temp_dir = TempDir::new().unwrap();
        let index = populated_index(&temp_dir, use_bloom_filter);
        let mut rng = rand::rng();

        group.bench_function(BenchmarkId::new("bloom", use_bloom_filter), |b| {
            b.iter(|| {
                let stream = rng.random_range(0..STREAMS);
                let version = rng.random_range(0..VERSIONS);
                black_box(index.get(stream, version).unwrap());
            });
        });
    }

    group.finish();
}

fn benchmark_latest_version(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let index = populated_index(&temp_dir, true);
    let mut rng = rand::rng();

    c.bench_function("index_version", |b| {
        b.iter(|| {
            let stream = rng.random_range(0..STREAMS);
            black_box(index.version(stream).unwrap());
        });
    });
}

fn benchmark_stream_range(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let index = populated_index(&temp_dir, true);
    let mut rng = rand::rng();

    let mut group = c.benchmark_group("index_range");
    group.throughput(Throughput::Elements(VERSIONS as u64));
    group.bench_function("all_of_stream", |b| {
        b.iter(|| {
            let stream = rng.random_range(0..STREAMS);
            black_box(index.range(&Range::all_of(stream)).unwrap());
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    benchmark_add,
    benchmark_point_lookup,
    benchmark_latest_version,
    benchmark_stream_range
);
criterion_main!(benches);
