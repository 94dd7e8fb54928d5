// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Read, bandwidth and cost instrumentation

use chrono::{DateTime, Local, Timelike, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use super::cache_config::CostModel;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;
const UNKNOWN_TABLE: &str = "unknown";
const ANONYMOUS_USER: &str = "anonymous";

/// Kind of event kept in the rolling history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryEventKind {
    Hit,
    DatabaseRead,
    FetchError,
    Eviction,
    Invalidation,
    Warming,
}

/// One entry of the rolling history
#[derive(Debug, Clone, Serialize)]
pub struct QueryRecord {
    pub kind: QueryEventKind,
    pub key: Option<String>,
    pub table: Option<String>,
    pub user_id: Option<String>,
    pub rows: usize,
    pub bytes: usize,
    pub latency_ms: f64,
    pub success: bool,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl QueryRecord {
    fn new(kind: QueryEventKind) -> Self {
        Self {
            kind,
            key: None,
            table: None,
            user_id: None,
            rows: 0,
            bytes: 0,
            latency_ms: 0.0,
            success: true,
            detail: None,
            timestamp: Utc::now(),
        }
    }
}

/// Basic cache counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub db_reads: u64,
    pub rows_read: u64,
    pub bandwidth_bytes: u64,
    pub entries: usize,
    pub memory_usage: usize,
}

impl CacheStats {
    pub fn total_requests(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Warming run counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct WarmingRunStats {
    pub runs: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Extra attempts beyond the first, over all runs
    pub retries: u64,
    pub avg_duration_ms: f64,
    pub failures_by_category: BTreeMap<String, u64>,
}

/// Detailed statistics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct EnhancedStats {
    #[serde(flatten)]
    pub basic: CacheStats,
    pub hit_rate: f64,
    pub reads_by_table: BTreeMap<String, u64>,
    /// Local hour of day (0-23) -> rows read
    pub reads_by_hour: BTreeMap<u32, u64>,
    pub reads_by_user: BTreeMap<String, u64>,
    pub bandwidth_mb: f64,
    pub estimated_cost: f64,
    /// Cost the hits avoided, priced as reads
    pub estimated_savings: f64,
    pub avg_hit_latency_ms: f64,
    pub avg_fetch_latency_ms: f64,
    pub warming: WarmingRunStats,
    pub recent_queries: Vec<QueryRecord>,
    pub tracking_since: DateTime<Utc>,
}

#[derive(Debug)]
struct TrackerState {
    basic: CacheStats,
    reads_by_table: BTreeMap<String, u64>,
    reads_by_hour: BTreeMap<u32, u64>,
    reads_by_user: BTreeMap<String, u64>,
    hit_latency_total: Duration,
    fetch_latency_total: Duration,
    warming: WarmingRunStats,
    warming_duration_total: Duration,
    history: VecDeque<QueryRecord>,
    tracking_since: DateTime<Utc>,
}

impl TrackerState {
    fn new(history_size: usize) -> Self {
        Self {
            basic: CacheStats::default(),
            reads_by_table: BTreeMap::new(),
            reads_by_hour: BTreeMap::new(),
            reads_by_user: BTreeMap::new(),
            hit_latency_total: Duration::ZERO,
            fetch_latency_total: Duration::ZERO,
            warming: WarmingRunStats::default(),
            warming_duration_total: Duration::ZERO,
            history: VecDeque::with_capacity(history_size),
            tracking_since: Utc::now(),
        }
    }
}

/// Thread-safe statistics aggregate.
///
/// Counters accumulate for the lifetime of the tracker and are cleared only
/// by [`StatisticsTracker::reset`]. The history keeps the last
/// `history_size` events, oldest first.
#[derive(Debug)]
pub struct StatisticsTracker {
    cost: CostModel,
    history_size: usize,
    state: Mutex<TrackerState>,
}

impl StatisticsTracker {
    pub fn new(cost: CostModel, history_size: usize) -> Self {
        let history_size = history_size.max(1);
        Self {
            cost,
            history_size,
            state: Mutex::new(TrackerState::new(history_size)),
        }
    }

    pub fn record_hit(&self, key: &str, table: Option<&str>, latency: Duration) {
        let mut state = self.state.lock();
        state.basic.hits += 1;
        state.hit_latency_total += latency;

        let mut record = QueryRecord::new(QueryEventKind::Hit);
        record.key = Some(key.to_string());
        record.table = table.map(str::to_string);
        record.latency_ms = as_millis_f64(latency);
        self.push(&mut state, record);
    }

    /// Record a successful fetch against the backing store
    pub fn record_db_read(
        &self,
        key: &str,
        table: Option<&str>,
        user_id: Option<&str>,
        rows: usize,
        bytes: usize,
        latency: Duration,
    ) {
        let mut state = self.state.lock();
        state.basic.misses += 1;
        state.basic.db_reads += 1;
        state.basic.rows_read += rows as u64;
        state.basic.bandwidth_bytes += bytes as u64;
        state.fetch_latency_total += latency;

        let rows_u64 = rows as u64;
        *state
            .reads_by_table
            .entry(table.unwrap_or(UNKNOWN_TABLE).to_string())
            .or_insert(0) += rows_u64;
        *state.reads_by_hour.entry(Local::now().hour()).or_insert(0) += rows_u64;
        *state
            .reads_by_user
            .entry(user_id.unwrap_or(ANONYMOUS_USER).to_string())
            .or_insert(0) += rows_u64;

        let mut record = QueryRecord::new(QueryEventKind::DatabaseRead);
        record.key = Some(key.to_string());
        record.table = table.map(str::to_string);
        record.user_id = user_id.map(str::to_string);
        record.rows = rows;
        record.bytes = bytes;
        record.latency_ms = as_millis_f64(latency);
        self.push(&mut state, record);
    }

    /// Record a failed fetch: counted as a miss carrying the error text
    pub fn record_fetch_error(
        &self,
        key: &str,
        table: Option<&str>,
        error: &str,
        latency: Duration,
    ) {
        let mut state = self.state.lock();
        state.basic.misses += 1;
        state.basic.errors += 1;

        let mut record = QueryRecord::new(QueryEventKind::FetchError);
        record.key = Some(key.to_string());
        record.table = table.map(str::to_string);
        record.latency_ms = as_millis_f64(latency);
        record.success = false;
        record.detail = Some(error.to_string());
        self.push(&mut state, record);
    }

    pub fn record_eviction(&self, key: &str, reason: &str) {
        let mut state = self.state.lock();
        state.basic.evictions += 1;

        let mut record = QueryRecord::new(QueryEventKind::Eviction);
        record.key = Some(key.to_string());
        record.detail = Some(reason.to_string());
        self.push(&mut state, record);
    }

    /// Record `count` evictions without per-key history, for bulk cleanups
    pub fn record_evictions(&self, count: usize, reason: &str) {
        if count == 0 {
            return;
        }
        let mut state = self.state.lock();
        state.basic.evictions += count as u64;

        let mut record = QueryRecord::new(QueryEventKind::Eviction);
        record.rows = count;
        record.detail = Some(reason.to_string());
        self.push(&mut state, record);
    }

    pub fn record_invalidation(&self, patterns: &[String], removed: usize) {
        let mut state = self.state.lock();
        state.basic.invalidations += removed as u64;

        let mut record = QueryRecord::new(QueryEventKind::Invalidation);
        record.rows = removed;
        record.detail = Some(patterns.join(","));
        self.push(&mut state, record);
    }

    /// Record the outcome of one warming task
    pub fn record_warming(
        &self,
        user_id: &str,
        success: bool,
        duration: Duration,
        attempts: u32,
        failure_category: Option<&str>,
    ) {
        let mut state = self.state.lock();
        state.warming.runs += 1;
        state.warming.retries += u64::from(attempts.saturating_sub(1));
        if success {
            state.warming.succeeded += 1;
        } else {
            state.warming.failed += 1;
            let category = failure_category.unwrap_or("other").to_string();
            *state.warming.failures_by_category.entry(category).or_insert(0) += 1;
        }
        state.warming_duration_total += duration;
        state.warming.avg_duration_ms =
            as_millis_f64(state.warming_duration_total) / state.warming.runs as f64;

        let mut record = QueryRecord::new(QueryEventKind::Warming);
        record.user_id = Some(user_id.to_string());
        record.latency_ms = as_millis_f64(duration);
        record.success = success;
        record.detail = failure_category.map(str::to_string);
        self.push(&mut state, record);
    }

    /// Counter snapshot. `entries` and `memory_usage` are left at zero; the
    /// cache fills them in from its store.
    pub fn snapshot(&self) -> CacheStats {
        self.state.lock().basic.clone()
    }

    pub fn warming_stats(&self) -> WarmingRunStats {
        self.state.lock().warming.clone()
    }

    pub fn enhanced(&self) -> EnhancedStats {
        let state = self.state.lock();
        let basic = state.basic.clone();

        let avg_hit_latency_ms = average_ms(state.hit_latency_total, basic.hits);
        let avg_fetch_latency_ms = average_ms(state.fetch_latency_total, basic.db_reads);
        let bandwidth_gb = basic.bandwidth_bytes as f64 / BYTES_PER_GB;
        let estimated_cost = basic.rows_read as f64 * self.cost.cost_per_read
            + bandwidth_gb * self.cost.cost_per_gb;
        let estimated_savings = basic.hits as f64 * self.cost.cost_per_read;

        EnhancedStats {
            hit_rate: basic.hit_rate(),
            bandwidth_mb: basic.bandwidth_bytes as f64 / (1024.0 * 1024.0),
            basic,
            reads_by_table: state.reads_by_table.clone(),
            reads_by_hour: state.reads_by_hour.clone(),
            reads_by_user: state.reads_by_user.clone(),
            estimated_cost,
            estimated_savings,
            avg_hit_latency_ms,
            avg_fetch_latency_ms,
            warming: state.warming.clone(),
            recent_queries: state.history.iter().cloned().collect(),
            tracking_since: state.tracking_since,
        }
    }

    /// Most recent events, newest first
    pub fn recent_events(&self, limit: Option<usize>) -> Vec<QueryRecord> {
        let state = self.state.lock();
        let limit = limit.unwrap_or(self.history_size).min(state.history.len());
        state.history.iter().rev().take(limit).cloned().collect()
    }

    pub fn reset(&self) {
        *self.state.lock() = TrackerState::new(self.history_size);
    }

    fn push(&self, state: &mut TrackerState, record: QueryRecord) {
        if state.history.len() >= self.history_size {
            state.history.pop_front();
        }
        state.history.push_back(record);
    }
}

fn as_millis_f64(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

fn average_ms(total: Duration, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        as_millis_f64(total) / count as f64
    }
}
