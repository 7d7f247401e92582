//! Lookup cache hit-path and full-table benchmarks.
//!
//! Run with: cargo bench --bench lru_bench

use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use rowbridge_core::config::{MissingKeyPolicy, RetryConfig};
use rowbridge_core::lookup::full_table::FullTableCache;
use rowbridge_core::testing::InMemoryStore;
use rowbridge_core::{LookupKey, LruCache, Row, ScalarValue, StoreFetcher};

fn rows(n: i64) -> Vec<Row> {
    (0..n)
        .map(|i| {
            Row::from_pairs([
                ("id", ScalarValue::Int64(i)),
                ("name", ScalarValue::Utf8(format!("name-{i:08}"))),
            ])
        })
        .collect()
}

fn keys(n: i64) -> Vec<LookupKey> {
    let cols: Arc<[String]> = vec!["id".to_string()].into();
    (0..n)
        .map(|i| LookupKey::new(Arc::clone(&cols), vec![ScalarValue::Int64(i)]).expect("key"))
        .collect()
}

fn fetcher(store: Arc<InMemoryStore>) -> StoreFetcher<InMemoryStore> {
    StoreFetcher::new(store, RetryConfig::none(), Duration::from_secs(5), 16)
}

/// Benchmark LRU hits on a warm cache.
fn bench_lru_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("lru_hit");
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime");

    for &size in &[1_000_i64, 10_000] {
        let store = Arc::new(InMemoryStore::new(rows(size)));
        let cache = LruCache::new(
            fetcher(store),
            usize::try_from(size).expect("size"),
            None,
            MissingKeyPolicy::CacheEmpty,
        );
        let keys = keys(size);
        rt.block_on(async {
            for key in &keys {
                cache.get(key).await.expect("warm");
            }
        });

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("get", size), &keys, |b, keys| {
            let mut i = 0usize;
            b.to_async(&rt).iter(|| {
                let key = &keys[i % keys.len()];
                i += 1;
                let cache = &cache;
                async move { black_box(cache.get(key).await.expect("hit")) }
            });
        });
    }

    group.finish();
}

/// Benchmark full-table snapshot reads.
fn bench_full_table_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_table_get");
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime");

    let size = 10_000_i64;
    let store = Arc::new(InMemoryStore::new(rows(size)));
    let cols: Arc<[String]> = vec!["id".to_string()].into();
    let cache = rt
        .block_on(FullTableCache::load(fetcher(store), cols, None))
        .expect("load");
    let keys = keys(size);

    group.throughput(Throughput::Elements(1));
    group.bench_function("get", |b| {
        let mut i = 0usize;
        b.iter(|| {
            let key = &keys[i % keys.len()];
            i += 1;
            black_box(cache.get(key))
        });
    });

    group.finish();
}

criterion_group!(benches, bench_lru_hit, bench_full_table_get);
criterion_main!(benches);
