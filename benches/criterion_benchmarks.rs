//! Single-threaded throughput benchmarks for `Cache::add`/`Cache::get`.

use core::num::NonZeroUsize;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lifespan_cache::{Cache, CacheConfig};

#[derive(Clone, PartialEq)]
struct Entry {
    id: u64,
    payload: u64,
}

fn make_cache(capacity: usize) -> Cache<Entry> {
    let cache = Cache::new(CacheConfig {
        capacity: NonZeroUsize::new(capacity).unwrap(),
        min_age: Duration::from_secs(60),
        max_age: Duration::from_secs(3600),
        validity: None,
    });
    cache.add_index::<u64>("by_id", |e| e.id, None);
    cache
}

pub fn criterion_benchmark(c: &mut Criterion) {
    const CACHE_SIZE: usize = 1000;
    let mut group = c.benchmark_group("Cache Operations");

    group.bench_function("add_new_keys", |b| {
        let cache = make_cache(CACHE_SIZE);
        let mut next = 0u64;
        b.iter(|| {
            cache
                .add(Entry {
                    id: black_box(next),
                    payload: next,
                })
                .unwrap();
            next = next.wrapping_add(1);
        });
    });

    group.bench_function("get_hit", |b| {
        let cache = make_cache(CACHE_SIZE);
        for id in 0..CACHE_SIZE as u64 {
            cache.add(Entry { id, payload: id }).unwrap();
        }
        let mut next = 0u64;
        b.iter(|| {
            let id = next % CACHE_SIZE as u64;
            black_box(cache.get::<u64>("by_id", &id, None).unwrap());
            next = next.wrapping_add(1);
        });
    });

    group.bench_function("get_miss_with_loader", |b| {
        let cache: Cache<Entry> = Cache::new(CacheConfig {
            capacity: NonZeroUsize::new(CACHE_SIZE).unwrap(),
            min_age: Duration::from_secs(60),
            max_age: Duration::from_secs(3600),
            validity: None,
        });
        let loader: lifespan_cache::Loader<u64, Entry> =
            std::sync::Arc::new(|id: &u64| Ok(Some(Entry { id: *id, payload: *id })));
        cache.add_index::<u64>("by_id", |e| e.id, Some(loader));
        let mut next = 0u64;
        b.iter(|| {
            black_box(cache.get::<u64>("by_id", &next, None).unwrap());
            next = next.wrapping_add(1);
        });
    });

    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
