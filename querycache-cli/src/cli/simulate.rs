// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! CLI command handlers
//!
//! Each handler builds a single-threaded runtime for the lifetime of the
//! command, runs the cache against [`SyntheticBackend`] and prints a report.

use async_trait::async_trait;
use colored::Colorize;
use querycache::cache::spawn_expiry_sweep;
use querycache::{
    CacheConfig, CacheKeyBuilder, CacheOptions, CacheWarmer, CacheWarmingService, InvalidateOptions,
    MemoryMonitor, QueryCache, WarmingContext, WarmingPhase, WarmingTaskError,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::commands::{OutputFormat, Preset};
use super::output::{SimulationSummary, StatsFormatter};

static TABLES: [&str; 4] = ["workout_logs", "programs", "exercises", "personal_records"];

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Shape of a simulated workload
#[derive(Debug, Clone)]
pub struct Workload {
    pub users: usize,
    pub requests: usize,
    pub write_ratio: f64,
    pub failure_rate: f64,
    pub latency_ms: u64,
}

/// Stand-in for the hosted database: random row counts, fixed latency and
/// an optional failure rate.
struct SyntheticBackend {
    latency: Duration,
    failure_rate: f64,
    reads: AtomicUsize,
}

impl SyntheticBackend {
    fn new(latency: Duration, failure_rate: f64) -> Self {
        Self {
            latency,
            failure_rate,
            reads: AtomicUsize::new(0),
        }
    }

    async fn list(&self, table: &str, user_id: &str) -> Result<Value, String> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if fastrand::f64() < self.failure_rate {
            return Err(format!("connection reset while reading {}", table));
        }

        let rows = match table {
            "workout_logs" => fastrand::usize(5..30),
            "exercises" => fastrand::usize(20..60),
            "personal_records" => fastrand::usize(1..10),
            _ => fastrand::usize(1..4),
        };
        Ok(Value::Array(
            (0..rows)
                .map(|i| json!({"id": i, "user_id": user_id, "table": table, "value": fastrand::u32(..1000)}))
                .collect(),
        ))
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

async fn read_through(
    cache: &QueryCache,
    backend: &Arc<SyntheticBackend>,
    table: &str,
    user_id: &str,
) -> Result<bool, String> {
    let key = CacheKeyBuilder::new(table, "list").user(user_id).build();
    let options = CacheOptions::new().table(table).user(user_id);
    let source = Arc::clone(backend);
    let (t, u) = (table.to_string(), user_id.to_string());
    let fetched = cache
        .get_with_cache(&key, move || async move { source.list(&t, &u).await }, &options)
        .await?;
    Ok(fetched.from_cache)
}

struct BackendWarmer {
    cache: Arc<QueryCache>,
    backend: Arc<SyntheticBackend>,
}

impl BackendWarmer {
    fn tables(phase: &WarmingPhase) -> &'static [&'static str] {
        match phase {
            WarmingPhase::Essential => &TABLES[..2],
            WarmingPhase::Secondary => &TABLES[2..],
            WarmingPhase::Full => &TABLES,
            WarmingPhase::Page(page) => match page.as_str() {
                "dashboard" | "home" => &TABLES[..2],
                "progress" => &TABLES[3..],
                "exercises" => &TABLES[2..3],
                _ => &TABLES[..1],
            },
        }
    }
}

#[async_trait]
impl CacheWarmer for BackendWarmer {
    async fn warm(&self, user_id: &str, phase: &WarmingPhase) -> Result<(), WarmingTaskError> {
        for table in Self::tables(phase) {
            read_through(&self.cache, &self.backend, table, user_id)
                .await
                .map_err(WarmingTaskError::new)?;
        }
        Ok(())
    }
}

fn load_config(path: Option<&Path>) -> Result<CacheConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .map_err(|e| format!("Failed to read config {:?}: {}", path, e))?;
            Ok(CacheConfig::from_json_str(&json)?)
        }
        None => Ok(CacheConfig::default()),
    }
}

fn check_ratio(name: &str, value: f64) -> Result<(), String> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(format!("{} must be within 0.0..=1.0, got {}", name, value))
    }
}

fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
}

/// Handle the simulate command
pub fn handle_simulate(
    config_path: Option<PathBuf>,
    workload: Workload,
    format: OutputFormat,
) -> CliResult {
    check_ratio("write_ratio", workload.write_ratio)?;
    check_ratio("failure_rate", workload.failure_rate)?;
    if workload.users == 0 {
        return Err("users must be > 0".into());
    }

    let config = load_config(config_path.as_deref())?;
    let cache: Arc<QueryCache> = Arc::new(QueryCache::new(config)?);
    let backend = Arc::new(SyntheticBackend::new(
        Duration::from_millis(workload.latency_ms),
        workload.failure_rate,
    ));

    if matches!(format, OutputFormat::Table) {
        println!(
            "{}",
            format!(
                "Simulating {} requests across {} users...",
                workload.requests, workload.users
            )
            .bold()
            .green()
        );
    }

    let summary = runtime()?.block_on(async {
        let _sweep = spawn_expiry_sweep(Arc::clone(&cache));
        let monitor = Arc::new(MemoryMonitor::new(Arc::clone(&cache)));
        let _monitoring = Arc::clone(&monitor).spawn();

        let started = Instant::now();
        let mut summary = SimulationSummary::default();

        for _ in 0..workload.requests {
            let user_id = format!("user-{}", fastrand::usize(..workload.users));
            let table = TABLES[fastrand::usize(..TABLES.len())];

            if fastrand::f64() < workload.write_ratio {
                // A write makes the user's cached rows for that table stale
                summary.writes += 1;
                summary.invalidated += cache.invalidate(
                    Vec::<String>::new(),
                    &InvalidateOptions::new().tables([table]).user(user_id.as_str()),
                );
                continue;
            }

            summary.reads += 1;
            if let Err(error) = read_through(&cache, &backend, table, &user_id).await {
                log::debug!("Read failed for {}: {}", user_id, error);
                summary.failed_reads += 1;
            }
        }

        monitor.check();
        summary.requests = workload.requests;
        summary.backend_reads = backend.reads();
        summary.elapsed_ms = started.elapsed().as_millis();
        summary
    });

    println!(
        "{}",
        StatsFormatter::simulation(&summary, &cache.enhanced_stats(), &cache.health(), format)
    );
    Ok(())
}

/// Handle the warm command
pub fn handle_warm(
    config_path: Option<PathBuf>,
    users: usize,
    page: Option<String>,
    new_session: bool,
    failure_rate: f64,
    format: OutputFormat,
) -> CliResult {
    check_ratio("failure_rate", failure_rate)?;

    let mut config = load_config(config_path.as_deref())?;
    // The handler drains the queue itself so it can report when it is done
    config.warming.auto_process = false;
    let cache: Arc<QueryCache> = Arc::new(QueryCache::new(config)?);
    let backend = Arc::new(SyntheticBackend::new(Duration::from_millis(1), failure_rate));
    let warmer = Arc::new(BackendWarmer {
        cache: Arc::clone(&cache),
        backend: Arc::clone(&backend),
    });
    let service = CacheWarmingService::for_cache(&*cache, warmer)?;

    let mut responses = Vec::with_capacity(users);
    for i in 0..users {
        let mut context = WarmingContext::new();
        if let Some(page) = &page {
            context = context.page(page.clone());
        }
        if new_session {
            context = context.new_session();
        }
        responses.push(service.smart_warm_cache(&format!("user-{}", i), &context)?);
    }

    let processed = runtime()?.block_on(service.process_queue());
    log::info!("Processed {} warming tasks", processed);

    println!(
        "{}",
        StatsFormatter::warming(&responses, &service.warming_stats(), &cache.stats(), format)
    );
    Ok(())
}

/// Handle the config command
pub fn handle_config(config_path: Option<PathBuf>, preset: Option<Preset>) -> CliResult {
    let config = match (config_path, preset) {
        (Some(path), _) => load_config(Some(&path))?,
        (None, Some(Preset::ReadOptimized)) => CacheConfig::read_optimized(),
        (None, Some(Preset::MemoryConstrained)) => CacheConfig::memory_constrained(),
        (None, Some(Preset::Default)) | (None, None) => CacheConfig::default(),
    };
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
