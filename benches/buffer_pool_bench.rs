// Buffer pool performance benchmarks.
// Pin/unpin throughput and LRU eviction cost under different capacities.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use minidb::storage::{BufferPool, BufferPoolConfig};
use std::fs;
use tempfile::TempDir;

fn populate(block_size: usize, blocks: u32) -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bench.dat");
    fs::write(&path, vec![0u8; block_size * blocks as usize]).unwrap();
    (dir, path)
}

fn bench_pin_unpin(c: &mut Criterion) {
    let mut group = c.benchmark_group("pin_unpin");
    let (_dir, path) = populate(4096, 64);

    for capacity in [16usize, 64, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, &capacity| {
            let pool = BufferPool::open(BufferPoolConfig { capacity, block_size: 4096 });
            b.iter(|| {
                let guard = pool.get(&path, black_box(3)).unwrap();
                black_box(guard.read().unwrap());
            });
        });
    }

    group.finish();
}

fn bench_lru_eviction(c: &mut Criterion) {
    let (_dir, path) = populate(4096, 256);

    c.bench_function("lru_eviction_pressure", |b| {
        let pool = BufferPool::open(BufferPoolConfig { capacity: 32, block_size: 4096 });
        b.iter(|| {
            for block in 0..128u32 {
                let guard = pool.get(&path, black_box(block)).unwrap();
                drop(guard);
            }
        });
    });
}

fn bench_write_flush(c: &mut Criterion) {
    let (_dir, path) = populate(4096, 8);
    let pool = BufferPool::open(BufferPoolConfig { capacity: 8, block_size: 4096 });
    let payload = vec![7u8; 4096];

    c.bench_function("write_flush", |b| {
        b.iter(|| {
            let guard = pool.get(&path, black_box(0)).unwrap();
            guard.write(&payload, false).unwrap();
            guard.flush().unwrap();
        });
    });
}

criterion_group!(benches, bench_pin_unpin, bench_lru_eviction, bench_write_flush);
criterion_main!(benches);
