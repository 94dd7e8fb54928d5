// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Cache configuration, per-call options and presets

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::CacheError;

const MB: usize = 1024 * 1024;

/// Global cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable/disable caching entirely. A disabled cache always fetches.
    pub enabled: bool,

    /// Default time-to-live for entries
    #[serde(with = "millis")]
    pub ttl: Duration,

    /// Maximum number of entries before LRU eviction kicks in
    pub max_cache_size: usize,

    /// Interval of the background expired-entry sweep
    #[serde(with = "millis")]
    pub cleanup_interval: Duration,

    /// Number of events kept in the rolling query history
    pub history_size: usize,

    /// Memory monitor thresholds
    pub memory: MemoryThresholds,

    /// Read/bandwidth cost estimation
    pub cost: CostModel,

    /// Cache-warming queue settings
    pub warming: WarmingConfig,
}

/// Byte thresholds used by the memory monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryThresholds {
    pub warning_bytes: usize,
    pub critical_bytes: usize,
    pub emergency_bytes: usize,

    /// How often the monitor samples memory usage
    #[serde(with = "millis")]
    pub monitor_interval: Duration,
}

/// Pricing used to turn read counts and bandwidth into a cost estimate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CostModel {
    /// Cost of a single database read
    pub cost_per_read: f64,
    /// Cost of one GiB of egress
    pub cost_per_gb: f64,
}

/// Cache-warming queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmingConfig {
    /// Maximum number of queued (not yet running) tasks
    pub max_queue_size: usize,

    /// Attempts per task, including the first one
    pub max_attempts: u32,

    /// Delay before each retry; the last delay repeats when attempts outnumber it
    #[serde(with = "millis_vec")]
    pub retry_delays: Vec<Duration>,

    /// Random extra delay as a fraction of the scheduled delay (0.0 - 1.0)
    pub retry_jitter: f64,

    /// Spawn the queue processor automatically when a task is enqueued
    pub auto_process: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(300),              // 5 minutes
            max_cache_size: 1000,
            cleanup_interval: Duration::from_secs(300), // 5 minutes
            history_size: 100,
            memory: MemoryThresholds::default(),
            cost: CostModel::default(),
            warming: WarmingConfig::default(),
        }
    }
}

impl Default for MemoryThresholds {
    fn default() -> Self {
        Self {
            warning_bytes: 25 * MB,
            critical_bytes: 50 * MB,
            emergency_bytes: 100 * MB,
            monitor_interval: Duration::from_secs(30),
        }
    }
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            // $0.06 per 100k document reads
            cost_per_read: 0.000_000_6,
            cost_per_gb: 0.12,
        }
    }
}

impl Default for WarmingConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 100,
            max_attempts: 3,
            retry_delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(5),
            ],
            retry_jitter: 0.0,
            auto_process: true,
        }
    }
}

impl CacheConfig {
    /// Create configuration optimized for read-heavy dashboards
    pub fn read_optimized() -> Self {
        Self {
            ttl: Duration::from_secs(600), // 10 minutes
            max_cache_size: 2000,
            ..Self::default()
        }
    }

    /// Create configuration for memory-constrained clients
    pub fn memory_constrained() -> Self {
        let mut config = Self::default();
        config.max_cache_size = 250;
        config.memory.warning_bytes = 5 * MB;
        config.memory.critical_bytes = 10 * MB;
        config.memory.emergency_bytes = 20 * MB;
        config.memory.monitor_interval = Duration::from_secs(15);
        config.warming.max_queue_size = 25;
        config
    }

    /// Parse a JSON document and validate the result
    pub fn from_json_str(json: &str) -> Result<Self, CacheError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CacheError::InvalidConfig(format!("Malformed config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.max_cache_size == 0 {
            return Err(CacheError::InvalidConfig(
                "max_cache_size must be > 0".to_string(),
            ));
        }

        if self.ttl.is_zero() {
            return Err(CacheError::InvalidConfig("ttl must be > 0".to_string()));
        }

        if self.cleanup_interval.is_zero() || self.memory.monitor_interval.is_zero() {
            return Err(CacheError::InvalidConfig(
                "cleanup_interval and monitor_interval must be > 0".to_string(),
            ));
        }

        if self.history_size == 0 {
            return Err(CacheError::InvalidConfig(
                "history_size must be > 0".to_string(),
            ));
        }

        let memory = &self.memory;
        if !(memory.warning_bytes < memory.critical_bytes
            && memory.critical_bytes < memory.emergency_bytes)
        {
            return Err(CacheError::InvalidConfig(format!(
                "Memory thresholds must be ascending: warning {} < critical {} < emergency {}",
                memory.warning_bytes, memory.critical_bytes, memory.emergency_bytes
            )));
        }

        if self.cost.cost_per_read < 0.0 || self.cost.cost_per_gb < 0.0 {
            return Err(CacheError::InvalidConfig(
                "Cost model values must be non-negative".to_string(),
            ));
        }

        self.warming
            .validate()
            .map_err(|e| CacheError::InvalidConfig(e.to_string()))
    }
}

impl WarmingConfig {
    pub fn validate(&self) -> Result<(), crate::error::WarmingError> {
        use crate::error::WarmingError;

        if self.max_queue_size == 0 {
            return Err(WarmingError::InvalidConfig(
                "max_queue_size must be > 0".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(WarmingError::InvalidConfig(
                "max_attempts must be >= 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry_jitter) {
            return Err(WarmingError::InvalidConfig(format!(
                "retry_jitter must be within 0.0..=1.0, got {}",
                self.retry_jitter
            )));
        }
        Ok(())
    }
}

/// Per-call options for reads and inserts
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    /// Overrides the configured default TTL
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
    pub user_id: Option<String>,
    /// Skip the lookup and always refetch
    pub bypass_cache: bool,
    /// Source table, used for statistics and table-scoped invalidation
    pub table: Option<String>,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn bypass_cache(mut self, bypass: bool) -> Self {
        self.bypass_cache = bypass;
        self
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod millis_vec {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        values: &[Duration],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|d| d.as_millis() as u64))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Duration>, D::Error> {
        let raw = Vec::<u64>::deserialize(deserializer)?;
        Ok(raw.into_iter().map(Duration::from_millis).collect())
    }
}
