use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rand::{Rng, distr::Alphanumeric};
use spillmap::{Options, SpillMap};
use tempfile::tempdir;

type ByteMap = SpillMap<Vec<u8>, Vec<u8>>;

/// Generates a vector of key-value pairs for benchmarking.
fn generate_data(size: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut rng = rand::rng();
    (0..size)
        .map(|_| {
            let key_len = rng.random_range(1..=25);
            let val_len = rng.random_range(1..=250);
            let key: Vec<u8> = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(key_len)
                .collect();
            let value = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(val_len)
                .collect();
            (key, value)
        })
        .collect()
}

use std::time::Duration;

fn benchmark_map_comparisons(c: &mut Criterion) {
    for &size in &[1_000, 10_000] {
        let mut group = c.benchmark_group(format!("size={size}"));
        if size >= 10_000 {
            // Reduce sample count for the disk-heavy benchmarks
            group.sample_size(10);
            group.measurement_time(Duration::from_secs(30));
        }

        let data = generate_data(size);

        // --- SpillMap with a zero budget: every insert goes to disk ---
        let spill_dir = tempdir().unwrap();
        let spill_path = spill_dir.path().join("map");

        group.bench_function("SpillMap<threshold=0> - insert", |b| {
            b.iter_with_setup(
                || {
                    // Reopening destroys the previous files for a fresh start
                    Options::new(&spill_path)
                        .buckets(64)
                        .memory_threshold(0)
                        .open()
                        .unwrap()
                },
                |mut map: ByteMap| {
                    for (k, v) in data.iter() {
                        map.insert(black_box(k.clone()), black_box(v.clone()))
                            .unwrap();
                    }
                },
            );
        });

        let spill_get_dir = tempdir().unwrap();
        let mut spill_map_get: ByteMap = Options::new(spill_get_dir.path().join("map"))
            .buckets(64)
            .memory_threshold(0)
            .open()
            .unwrap();
        for (k, v) in data.iter() {
            spill_map_get.insert(k.clone(), v.clone()).unwrap();
        }
        group.bench_function("SpillMap<threshold=0> - get", |b| {
            b.iter(|| {
                for (k, _) in data.iter() {
                    black_box(spill_map_get.get(black_box(k)).unwrap());
                }
            })
        });

        // --- SpillMap with an unbounded budget: everything stays resident ---
        let mem_dir = tempdir().unwrap();
        let mem_path = mem_dir.path().join("map");

        group.bench_function("SpillMap<threshold=max> - insert", |b| {
            b.iter_with_setup(
                || {
                    Options::new(&mem_path)
                        .buckets(64)
                        .memory_threshold(usize::MAX)
                        .open()
                        .unwrap()
                },
                |mut map: ByteMap| {
                    for (k, v) in data.iter() {
                        map.insert(black_box(k.clone()), black_box(v.clone()))
                            .unwrap();
                    }
                },
            );
        });

        let mem_get_dir = tempdir().unwrap();
        let mut mem_map_get: ByteMap = Options::new(mem_get_dir.path().join("map"))
            .buckets(64)
            .memory_threshold(usize::MAX)
            .open()
            .unwrap();
        for (k, v) in data.iter() {
            mem_map_get.insert(k.clone(), v.clone()).unwrap();
        }
        group.bench_function("SpillMap<threshold=max> - get", |b| {
            b.iter(|| {
                for (k, _) in data.iter() {
                    black_box(mem_map_get.get(black_box(k)).unwrap());
                }
            })
        });

        // --- Sled DB ---
        group.bench_function("Sled - insert", |b| {
            b.iter_with_setup(
                || tempdir().unwrap(),
                |dir| {
                    let db = sled::open(dir.path()).unwrap();
                    for (k, v) in data.iter() {
                        db.insert(black_box(k.as_slice()), black_box(v.as_slice()))
                            .unwrap();
                    }
                    db.flush().unwrap();
                },
            )
        });

        let sled_dir_get = tempdir().unwrap();
        let sled_db_get = sled::open(sled_dir_get.path()).unwrap();
        for (k, v) in data.iter() {
            sled_db_get.insert(k, v.as_slice()).unwrap();
        }
        sled_db_get.flush().unwrap();
        group.bench_function("Sled - get", |b| {
            b.iter(|| {
                for (k, _) in data.iter() {
                    black_box(sled_db_get.get(black_box(k)).unwrap());
                }
            })
        });
    }
}

criterion_group!(benches, benchmark_map_comparisons);
criterion_main!(benches);
