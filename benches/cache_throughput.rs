/// Benchmark for query cache throughput
///
/// Measures hit and miss throughput of get_with_cache, capacity eviction
/// under churn, and the cost of pattern and user scoped invalidation.

use querycache::{CacheConfig, CacheKeyBuilder, CacheOptions, InvalidateOptions, QueryCache};
use serde_json::{json, Value};
use std::time::{Duration, Instant};

fn rows(user: usize, count: usize) -> Value {
    Value::Array(
        (0..count)
            .map(|i| json!({"user_id": user, "day": i, "volume": i * 100}))
            .collect(),
    )
}

fn report(label: &str, iterations: usize, elapsed: Duration) {
    println!("  Iterations: {}", iterations);
    println!("  Time: {:?}", elapsed);
    println!(
        "  Throughput: {:.0} {}/sec",
        iterations as f64 / elapsed.as_secs_f64(),
        label
    );
    println!();
}

fn main() {
    let _ = env_logger::builder().is_test(true).try_init();

    println!("=== Query Cache Throughput Benchmark ===\n");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime");

    let config = CacheConfig {
        max_cache_size: 10_000,
        ..CacheConfig::default()
    };
    let cache: QueryCache = QueryCache::new(config).expect("valid config");
    let users = 500;
    let keys: Vec<String> = (0..users)
        .map(|u| {
            CacheKeyBuilder::new("workout_logs", "list")
                .user(u.to_string())
                .build()
        })
        .collect();

    println!("📊 Benchmark: get_with_cache - Cold Misses");
    let start = Instant::now();
    runtime.block_on(async {
        for (user, key) in keys.iter().enumerate() {
            let options = CacheOptions::new().table("workout_logs").user(user.to_string());
            let _ = cache
                .get_with_cache(key, || async move { Ok::<_, String>(rows(user, 20)) }, &options)
                .await;
        }
    });
    report("misses", users, start.elapsed());

    println!("📊 Benchmark: get_with_cache - Warm Hits");
    let iterations = 200_000;
    let start = Instant::now();
    runtime.block_on(async {
        for i in 0..iterations {
            let key = &keys[i % users];
            let _ = cache
                .get_with_cache(
                    key,
                    || async { Err::<Value, _>("unexpected fetch".to_string()) },
                    &CacheOptions::new(),
                )
                .await;
        }
    });
    report("hits", iterations, start.elapsed());

    println!("📊 Benchmark: set - Capacity Churn (1000 entry limit)");
    let small: QueryCache = QueryCache::new(CacheConfig {
        max_cache_size: 1_000,
        ..CacheConfig::default()
    })
    .expect("valid config");
    let iterations = 50_000;
    let start = Instant::now();
    for i in 0..iterations {
        small.set(format!("churn:{}", i), json!(i), &CacheOptions::new());
    }
    report("inserts", iterations, start.elapsed());
    println!("  Evictions: {}\n", small.stats().evictions);

    println!("📊 Benchmark: invalidate - User Scope");
    let iterations = 100;
    let start = Instant::now();
    for user in 0..iterations {
        cache.invalidate(
            Vec::<String>::new(),
            &InvalidateOptions::new().user(user.to_string()),
        );
    }
    report("invalidations", iterations, start.elapsed());

    println!("📊 Benchmark: invalidate - Key Pattern");
    let start = Instant::now();
    for user in iterations..iterations * 2 {
        cache.invalidate([format!("user={}", user)], &InvalidateOptions::new());
    }
    report("invalidations", iterations, start.elapsed());

    let stats = cache.enhanced_stats();
    println!("=== Summary ===");
    println!("  Entries remaining: {}", stats.basic.entries);
    println!("  Hit rate: {:.2}%", stats.hit_rate * 100.0);
    println!("  Rows read: {}", stats.basic.rows_read);
}
