use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use talus::{Config, PersistMode};

fn point_write(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let tree = Config::new(&dir).open().unwrap();

    let mut x = 0_u64;

    c.bench_function("Tree insert", |b| {
        b.iter(|| {
            x += 1;
            tree.insert(x.to_be_bytes(), "value").unwrap();
        });
    });
}

fn batch_write(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let tree = Config::new(&dir).open().unwrap();

    c.bench_function("Batch commit", |b| {
        b.iter(|| {
            let mut batch = tree.batch();
            for item in 'a'..='z' {
                let item = item.to_string();
                batch.insert(&item, &item);
            }
            batch.commit().unwrap();
        });
    });
}

fn point_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("point read");

    for flushed in [false, true] {
        let dir = tempfile::tempdir().unwrap();
        let tree = Config::new(&dir).open().unwrap();

        for x in 0..100_000_u64 {
            tree.insert(x.to_be_bytes(), "value").unwrap();
        }

        if flushed {
            tree.flush().unwrap();
        }
        tree.persist(PersistMode::Buffer).unwrap();

        let name = if flushed { "segment" } else { "memtable" };

        group.bench_function(name, |b| {
            let mut x = 0_u64;

            b.iter(|| {
                x = (x + 7_919) % 100_000;
                black_box(tree.get(x.to_be_bytes()).unwrap());
            });
        });
    }
}

fn scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan");

    let dir = tempfile::tempdir().unwrap();
    let tree = Config::new(&dir).open().unwrap();

    for x in 0..100_000_u64 {
        tree.insert(x.to_be_bytes(), "value").unwrap();
    }
    tree.flush().unwrap();

    for &size in &[100_u64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size));

        group.bench_with_input(BenchmarkId::new("range", size), &size, |b, &size| {
            b.iter(|| {
                let start = 10_000_u64.to_be_bytes();
                let end = (10_000 + size).to_be_bytes();
                assert_eq!(size as usize, tree.range(start..end).count());
            });
        });
    }
}

criterion_group!(benches, point_write, batch_write, point_read, scan);
criterion_main!(benches);
