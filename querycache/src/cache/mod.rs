// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! In-memory query cache
//!
//! This module provides the read-through cache that sits in front of the
//! backend data source:
//! - Entry storage and deterministic key construction
//! - TTL expiry and LRU capacity eviction
//! - Targeted cleanup under memory pressure
//! - Pattern, tag, table and user scoped invalidation
//! - Hit/miss, bandwidth and cost statistics

pub mod cache_config;
pub mod cache_manager;
pub mod eviction;
pub mod invalidation;
pub mod key;
pub mod memory_monitor;
pub mod stats;
pub mod store;

pub use cache_config::{CacheConfig, CacheOptions, CostModel, MemoryThresholds, WarmingConfig};
pub use cache_manager::{CacheEvent, CacheHealth, EvictionReason, Fetched, QueryCache};
pub use eviction::{CleanupReport, CleanupStrategy};
pub use invalidation::{InvalidateOptions, InvalidationRule};
pub use key::{build_key, CacheKeyBuilder};
pub use memory_monitor::{
    spawn_expiry_sweep, MaintenanceHandle, MemoryCheck, MemoryMonitor, MemoryPressure, MonitorStats,
};
pub use stats::{
    CacheStats, EnhancedStats, QueryEventKind, QueryRecord, StatisticsTracker, WarmingRunStats,
};
pub use store::CacheStore;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Roughly thirty years; used in place of an unrepresentable expiry.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// A cached payload together with its bookkeeping
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub data: V,
    pub expiry: Instant,
    pub created_at: Instant,
    pub last_accessed: Instant,
    pub access_count: u64,
    pub size: usize,
    pub tags: BTreeSet<String>,
    pub table: Option<String>,
    pub user_id: Option<String>,

    // Logical clocks assigned by the store. Wall time can tie (and does under
    // a paused test clock), these never do.
    pub(crate) created_seq: u64,
    pub(crate) access_seq: u64,
}

impl<V> CacheEntry<V> {
    pub fn new(data: V, size: usize, ttl: Duration) -> Self {
        let now = Instant::now();
        let expiry = now
            .checked_add(ttl)
            .unwrap_or_else(|| now + FAR_FUTURE);
        Self {
            data,
            expiry,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            size,
            tags: BTreeSet::new(),
            table: None,
            user_id: None,
            created_seq: 0,
            access_seq: 0,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now > self.expiry
    }

    pub fn remaining_ttl(&self) -> Duration {
        self.expiry.saturating_duration_since(Instant::now())
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn update_access(&mut self) {
        self.last_accessed = Instant::now();
        self.access_count += 1;
    }
}

/// Values the cache can hold.
///
/// `size_bytes` feeds memory accounting and bandwidth statistics, so it
/// should approximate the serialized payload rather than the in-memory layout.
pub trait CacheValue: Clone + Send + Sync + 'static {
    fn size_bytes(&self) -> usize;

    /// Number of rows the payload represents, for read statistics
    fn row_count(&self) -> usize {
        1
    }
}

impl CacheValue for serde_json::Value {
    fn size_bytes(&self) -> usize {
        serde_json::to_vec(self).map(|bytes| bytes.len()).unwrap_or(0)
    }

    fn row_count(&self) -> usize {
        match self {
            serde_json::Value::Array(rows) => rows.len(),
            serde_json::Value::Null => 0,
            _ => 1,
        }
    }
}

impl CacheValue for String {
    fn size_bytes(&self) -> usize {
        self.len()
    }
}

impl CacheValue for Vec<u8> {
    fn size_bytes(&self) -> usize {
        self.len()
    }
}

impl<T: CacheValue> CacheValue for Arc<T> {
    fn size_bytes(&self) -> usize {
        self.as_ref().size_bytes()
    }

    fn row_count(&self) -> usize {
        self.as_ref().row_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_entry_expiry_boundary() {
        let entry = CacheEntry::new("v1".to_string(), 2, Duration::from_millis(1000));

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(!entry.is_expired());

        tokio::time::advance(Duration::from_millis(2)).await;
        assert!(entry.is_expired());
        assert_eq!(entry.remaining_ttl(), Duration::ZERO);
    }

    #[test]
    fn test_huge_ttl_does_not_overflow() {
        let entry = CacheEntry::new(1u8, 1, Duration::MAX);
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_update_access() {
        let mut entry = CacheEntry::new(json!({"a": 1}), 7, Duration::from_secs(60));
        assert_eq!(entry.access_count, 0);
        entry.update_access();
        entry.update_access();
        assert_eq!(entry.access_count, 2);
    }

    #[test]
    fn test_entry_builders() {
        let entry = CacheEntry::new(json!(null), 0, Duration::from_secs(1))
            .with_tags(["workout_logs", "user:42"])
            .with_table("workout_logs")
            .with_user("42");

        assert!(entry.has_tag("user:42"));
        assert!(!entry.has_tag("user:4"));
        assert_eq!(entry.table.as_deref(), Some("workout_logs"));
        assert_eq!(entry.user_id.as_deref(), Some("42"));
    }

    #[test]
    fn test_json_value_sizes_match_serialization() {
        let rows = json!([{"id": 1}, {"id": 2}]);
        assert_eq!(rows.size_bytes(), r#"[{"id":1},{"id":2}]"#.len());
        assert_eq!(rows.row_count(), 2);
        assert_eq!(json!(null).row_count(), 0);
        assert_eq!(json!({"id": 1}).row_count(), 1);
    }
}
