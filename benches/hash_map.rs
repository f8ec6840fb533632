use criterion::{criterion_group, criterion_main, Criterion};
use scb::HashMap;
use std::time::Instant;

fn insert(c: &mut Criterion) {
    c.bench_function("HashMap: insert", |b| {
        b.iter_custom(|iters| {
            let hashmap: HashMap<u64, u64> = HashMap::new();
            let start = Instant::now();
            for i in 0..iters {
                assert!(hashmap.insert(i, i).is_ok());
            }
            start.elapsed()
        })
    });
}

fn read(c: &mut Criterion) {
    c.bench_function("HashMap: read", |b| {
        b.iter_custom(|iters| {
            let hashmap: HashMap<u64, u64> = HashMap::new();
            for i in 0..iters {
                assert!(hashmap.insert(i, i).is_ok());
            }
            let start = Instant::now();
            for i in 0..iters {
                assert_eq!(hashmap.read(&i, |_, v| *v == i), Some(true));
            }
            start.elapsed()
        })
    });
}

fn remove(c: &mut Criterion) {
    c.bench_function("HashMap: remove", |b| {
        b.iter_custom(|iters| {
            let hashmap: HashMap<u64, u64> = HashMap::new();
            for i in 0..iters {
                assert!(hashmap.insert(i, i).is_ok());
            }
            let start = Instant::now();
            for i in 0..iters {
                assert!(hashmap.remove(&i).is_some());
            }
            start.elapsed()
        })
    });
}

criterion_group!(hash_map, insert, read, remove);
criterion_main!(hash_map);
