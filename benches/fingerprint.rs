//! Fingerprint Benchmarks
//!
//! Throughput of the content hasher for both digest algorithms, in memory and
//! streamed from disk.
//!
//! Run with: `cargo bench --bench fingerprint`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;

use muda_server::fingerprint::{fingerprint, hash_bytes, HashAlgorithm};

const SIZES: [usize; 3] = [4 * 1024, 1024 * 1024, 16 * 1024 * 1024];

fn payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

fn bench_hash_bytes(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash_bytes");
    group.measurement_time(Duration::from_secs(5));

    for size in SIZES {
        let data = payload(size);
        group.throughput(Throughput::Bytes(size as u64));

        for algorithm in [HashAlgorithm::Xxh3, HashAlgorithm::Sha256] {
            group.bench_with_input(BenchmarkId::new(algorithm.as_str(), size), &data, |b, data| {
                b.iter(|| hash_bytes(black_box(data), algorithm))
            });
        }
    }

    group.finish();
}

fn bench_fingerprint_file(c: &mut Criterion) {
    let temp = tempfile::TempDir::new().expect("temp dir");
    let mut group = c.benchmark_group("fingerprint_file");
    group.measurement_time(Duration::from_secs(5));

    for size in SIZES {
        let path = temp.path().join(format!("{size}.bin"));
        std::fs::write(&path, payload(size)).expect("write payload");
        group.throughput(Throughput::Bytes(size as u64));

        for algorithm in [HashAlgorithm::Xxh3, HashAlgorithm::Sha256] {
            group.bench_with_input(BenchmarkId::new(algorithm.as_str(), size), &path, |b, path| {
                b.iter(|| fingerprint(black_box(path), algorithm).expect("fingerprint"))
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_hash_bytes, bench_fingerprint_file);
criterion_main!(benches);
