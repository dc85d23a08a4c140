//! Tiered cache benchmarks.
//!
//! Run with: cargo bench --bench cache

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ripple::cache::{CacheConfig, CodecPipeline, IndexedStorage, SetOptions, TieredCache};
use serde_json::json;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn create_runtime() -> Runtime {
  tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()
    .unwrap()
}

fn sample_post(i: usize) -> serde_json::Value {
  json!({
    "id": i,
    "title": format!("Post {}", i),
    "body": "Lorem ipsum dolor sit amet, consectetur adipiscing elit.",
    "author": {"id": i % 17, "name": "Alice"},
    "tags": ["rust", "cache"]
  })
}

fn bench_memory(c: &mut Criterion) {
  let rt = create_runtime();
  let cache = TieredCache::in_memory(CacheConfig::default());

  let mut group = c.benchmark_group("memory");
  group.throughput(Throughput::Elements(1));

  group.bench_function("set", |b| {
    let mut i = 0usize;
    b.iter(|| {
      i += 1;
      rt.block_on(cache.set_value(
        &format!("post:{}", i % 500),
        sample_post(i),
        SetOptions::new().tag("posts"),
      ));
    });
  });

  rt.block_on(cache.set_value("hot", sample_post(1), SetOptions::new()));
  group.bench_function("get_hit", |b| {
    b.iter(|| black_box(rt.block_on(cache.get_value("hot"))));
  });

  group.bench_function("get_miss", |b| {
    b.iter(|| black_box(rt.block_on(cache.get_value("cold"))));
  });

  group.finish();
}

fn bench_eviction(c: &mut Criterion) {
  let rt = create_runtime();
  let cache = TieredCache::in_memory(CacheConfig {
    max_size: 100,
    ..Default::default()
  });

  c.bench_function("evicting_set", |b| {
    let mut i = 0usize;
    b.iter(|| {
      i += 1;
      rt.block_on(cache.set_value(&format!("k{}", i), json!(i), SetOptions::new()));
    });
  });
}

fn bench_invalidate(c: &mut Criterion) {
  let rt = create_runtime();

  let mut group = c.benchmark_group("invalidate_by_tag");
  for size in [10usize, 100, 1000] {
    group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
      let cache = TieredCache::in_memory(CacheConfig::default());
      b.iter(|| {
        rt.block_on(async {
          for i in 0..size {
            cache
              .set_value(&format!("post:{}", i), json!(i), SetOptions::new().tag("posts"))
              .await;
          }
          black_box(cache.invalidate_by_tag("posts").await);
        });
      });
    });
  }
  group.finish();
}

fn bench_codec(c: &mut Criterion) {
  let payload = serde_json::to_string(&sample_post(42)).unwrap();

  let mut group = c.benchmark_group("codec");
  for (name, compress, obfuscate) in [
    ("plain", false, false),
    ("gzip", true, false),
    ("gzip_obfuscate", true, true),
  ] {
    let pipeline = CodecPipeline::from_flags(compress, obfuscate);
    group.bench_function(name, |b| {
      b.iter(|| {
        let encoded = pipeline.encode_str(black_box(&payload)).unwrap();
        black_box(CodecPipeline::decode_str(&encoded).unwrap());
      });
    });
  }
  group.finish();
}

fn bench_indexed_backend(c: &mut Criterion) {
  let rt = create_runtime();
  let cache = rt.block_on(async {
    let storage = IndexedStorage::in_memory().await.unwrap();
    TieredCache::new(CacheConfig::default(), Some(Arc::new(storage)))
  });

  c.bench_function("indexed_write_through", |b| {
    let mut i = 0usize;
    b.iter(|| {
      i += 1;
      rt.block_on(cache.set_value(&format!("post:{}", i % 500), sample_post(i), SetOptions::new()));
    });
  });
}

criterion_group!(
  benches,
  bench_memory,
  bench_eviction,
  bench_invalidate,
  bench_codec,
  bench_indexed_backend
);
criterion_main!(benches);
