// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Read-through query cache service

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::error::CacheError;

use super::{
    eviction::{self, CleanupReport},
    invalidation::{user_tag, InvalidateOptions, InvalidationRule},
    memory_monitor::MemoryPressure,
    stats::{CacheStats, EnhancedStats, QueryRecord, StatisticsTracker},
    CacheConfig, CacheEntry, CacheOptions, CacheStore, CacheValue,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Result of a read through the cache
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<V> {
    pub data: V,
    /// True when the data came from a live cache entry rather than the fetch
    pub from_cache: bool,
}

impl<V> Fetched<V> {
    pub fn into_inner(self) -> V {
        self.data
    }
}

/// Why an entry left the cache without being invalidated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    Capacity,
    Expired,
    MemoryPressure,
}

impl EvictionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionReason::Capacity => "capacity",
            EvictionReason::Expired => "expired",
            EvictionReason::MemoryPressure => "memory_pressure",
        }
    }
}

/// Cache events for monitoring and debugging
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    Hit {
        key: String,
    },
    Miss {
        key: String,
    },
    Set {
        key: String,
        size: usize,
    },
    FetchFailed {
        key: String,
        error: String,
    },
    Evicted {
        key: String,
        reason: EvictionReason,
    },
    BulkEvicted {
        count: usize,
        reason: EvictionReason,
    },
    Invalidated {
        patterns: Vec<String>,
        removed: usize,
    },
    Cleared {
        removed: usize,
    },
}

/// Cache health assessment
#[derive(Debug, Clone, Serialize)]
pub struct CacheHealth {
    /// Weighted score between 0.0 and 1.0
    pub overall: f64,
    pub hit_rate: f64,
    pub memory_score: f64,
    pub eviction_score: f64,
    pub pressure: MemoryPressure,
    pub recommendations: Vec<String>,
}

/// In-memory TTL cache in front of an arbitrary async data source.
///
/// All state sits behind short-lived locks that are never held across an
/// `.await`; the fetch future runs with no lock taken. Share the cache across
/// tasks with an `Arc`.
pub struct QueryCache<V: CacheValue = serde_json::Value> {
    config: CacheConfig,
    store: Mutex<CacheStore<V>>,
    stats: Arc<StatisticsTracker>,
    events: broadcast::Sender<CacheEvent>,
}

impl<V: CacheValue> QueryCache<V> {
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        config.validate()?;

        let stats = Arc::new(StatisticsTracker::new(
            config.cost.clone(),
            config.history_size,
        ));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        // Preallocating the whole capacity would be wasteful for large limits
        let store = CacheStore::with_capacity(config.max_cache_size.min(1024));

        Ok(Self {
            config,
            store: Mutex::new(store),
            stats,
            events,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn statistics(&self) -> Arc<StatisticsTracker> {
        Arc::clone(&self.stats)
    }

    /// Subscribe to cache events. Slow receivers lag rather than block the cache.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Return the cached value for `key`, or run `fetch` and cache its result.
    ///
    /// A fetch error is recorded and handed back unchanged; nothing is cached
    /// for it, so the next call fetches again.
    pub async fn get_with_cache<F, Fut, E>(
        &self,
        key: &str,
        fetch: F,
        options: &CacheOptions,
    ) -> Result<Fetched<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: fmt::Display,
    {
        let table = options.table.as_deref();

        if self.config.enabled && !options.bypass_cache {
            let started = Instant::now();
            if let Some(data) = self.lookup(key).map(|entry| entry.data) {
                self.stats.record_hit(key, table, started.elapsed());
                debug!("Cache hit: {}", key);
                self.emit(CacheEvent::Hit {
                    key: key.to_string(),
                });
                return Ok(Fetched {
                    data,
                    from_cache: true,
                });
            }
        }

        debug!("Cache miss: {}", key);
        self.emit(CacheEvent::Miss {
            key: key.to_string(),
        });

        let started = Instant::now();
        match fetch().await {
            Ok(data) => {
                let latency = started.elapsed();
                self.stats.record_db_read(
                    key,
                    table,
                    options.user_id.as_deref(),
                    data.row_count(),
                    data.size_bytes(),
                    latency,
                );
                self.set(key, data.clone(), options);
                Ok(Fetched {
                    data,
                    from_cache: false,
                })
            }
            Err(error) => {
                let message = error.to_string();
                self.stats
                    .record_fetch_error(key, table, &message, started.elapsed());
                warn!("Fetch failed for {}: {}", key, message);
                self.emit(CacheEvent::FetchFailed {
                    key: key.to_string(),
                    error: message,
                });
                Err(error)
            }
        }
    }

    /// Read a live entry, counting it as a hit and updating its access metadata
    pub fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        let started = Instant::now();
        let entry = self.lookup(key)?;
        self.stats
            .record_hit(key, entry.table.as_deref(), started.elapsed());
        self.emit(CacheEvent::Hit {
            key: key.to_string(),
        });
        Some(entry)
    }

    /// Read a live entry without touching access metadata or statistics
    pub fn peek(&self, key: &str) -> Option<CacheEntry<V>> {
        let store = self.store.lock();
        store
            .get(key)
            .filter(|entry| !entry.is_expired())
            .cloned()
    }

    /// Insert `data` under `key`, evicting the least recently used entry
    /// when the cache is full. Returns false when caching is disabled.
    pub fn set(&self, key: impl Into<String>, data: V, options: &CacheOptions) -> bool {
        if !self.config.enabled {
            return false;
        }

        let key = key.into();
        let size = data.size_bytes();
        let ttl = options.ttl.unwrap_or(self.config.ttl);

        let mut entry = CacheEntry::new(data, size, ttl).with_tags(options.tags.iter().cloned());
        if let Some(table) = &options.table {
            entry.tags.insert(table.clone());
            entry.table = Some(table.clone());
        }
        if let Some(user_id) = &options.user_id {
            entry.tags.insert(user_tag(user_id));
            entry.user_id = Some(user_id.clone());
        }

        let evicted = {
            let mut store = self.store.lock();
            let evicted = eviction::evict_for_insert(&mut store, &key, self.config.max_cache_size);
            store.set(key.clone(), entry);
            evicted
        };

        if let Some((victim, _)) = evicted {
            self.stats
                .record_eviction(&victim, EvictionReason::Capacity.as_str());
            debug!("Evicted {} to make room for {}", victim, key);
            self.emit(CacheEvent::Evicted {
                key: victim,
                reason: EvictionReason::Capacity,
            });
        }

        self.emit(CacheEvent::Set { key, size });
        true
    }

    pub fn delete(&self, key: &str) -> bool {
        self.store.lock().delete(key).is_some()
    }

    /// True when a live entry exists for `key`
    pub fn contains_key(&self, key: &str) -> bool {
        self.store
            .lock()
            .get(key)
            .is_some_and(|entry| !entry.is_expired())
    }

    /// Number of stored entries, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.lock().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.store.lock().keys().cloned().collect()
    }

    /// Estimated size of all cached payloads in bytes
    pub fn memory_usage(&self) -> usize {
        self.store.lock().total_size()
    }

    /// Remove every entry matching one of `patterns` and all given filters.
    ///
    /// With no patterns the filters alone select entries. A call with neither
    /// patterns nor filters removes nothing; use [`QueryCache::clear`] to
    /// drop everything.
    pub fn invalidate<I, S>(&self, patterns: I, options: &InvalidateOptions) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns: Vec<String> = patterns
            .into_iter()
            .map(|p| p.as_ref().to_string())
            .collect();
        let rule = InvalidationRule::new(&patterns, options.clone());
        if rule.matches_everything() {
            warn!("Ignoring invalidation without patterns or filters");
            return 0;
        }

        let removed = self
            .store
            .lock()
            .remove_where(|key, entry| rule.matches(key, entry))
            .len();

        self.stats.record_invalidation(&patterns, removed);
        debug!("Invalidated {} entries for {:?}", removed, patterns);
        self.emit(CacheEvent::Invalidated { patterns, removed });
        removed
    }

    /// Remove every entry stored for `table`
    pub fn invalidate_table(&self, table: &str) -> usize {
        self.invalidate(
            Vec::<String>::new(),
            &InvalidateOptions::new().tables([table]),
        )
    }

    /// Remove every entry belonging to `user_id`
    pub fn invalidate_user(&self, user_id: &str) -> usize {
        self.invalidate(Vec::<String>::new(), &InvalidateOptions::new().user(user_id))
    }

    /// Remove every entry carrying any of `tags`
    pub fn invalidate_tags<I, S>(&self, tags: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.invalidate(Vec::<String>::new(), &InvalidateOptions::new().tags(tags))
    }

    /// Drop all entries, keeping statistics. Returns the number removed.
    pub fn clear(&self) -> usize {
        let removed = self.store.lock().clear();
        info!("Cleared {} cache entries", removed);
        self.emit(CacheEvent::Cleared { removed });
        removed
    }

    /// Drop all entries and reset statistics
    pub fn clear_all(&self) -> usize {
        let removed = self.clear();
        self.stats.reset();
        removed
    }

    /// Remove expired entries. Returns the number removed.
    pub fn cleanup(&self) -> usize {
        let removed = {
            let mut store = self.store.lock();
            eviction::remove_expired(&mut store, Instant::now())
        };
        if removed > 0 {
            self.stats
                .record_evictions(removed, EvictionReason::Expired.as_str());
            debug!("Swept {} expired entries", removed);
            self.emit(CacheEvent::BulkEvicted {
                count: removed,
                reason: EvictionReason::Expired,
            });
        }
        removed
    }

    /// Reduce the cached byte total by `target_fraction` using the cleanup
    /// strategies in order.
    pub fn perform_cleanup(&self, target_fraction: f64) -> CleanupReport {
        let report = {
            let mut store = self.store.lock();
            eviction::perform_cleanup(&mut store, target_fraction)
        };

        let removed = report.total_removed();
        if removed > 0 {
            self.stats
                .record_evictions(removed, EvictionReason::MemoryPressure.as_str());
            self.emit(CacheEvent::BulkEvicted {
                count: removed,
                reason: EvictionReason::MemoryPressure,
            });
        }
        info!(
            "Cleanup removed {} entries, {} -> {} bytes (target {}, reached: {})",
            removed,
            report.initial_size,
            report.final_size,
            report.target_size,
            report.target_reached
        );
        report
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.snapshot();
        let store = self.store.lock();
        stats.entries = store.len();
        stats.memory_usage = store.total_size();
        stats
    }

    pub fn enhanced_stats(&self) -> EnhancedStats {
        let mut stats = self.stats.enhanced();
        let store = self.store.lock();
        stats.basic.entries = store.len();
        stats.basic.memory_usage = store.total_size();
        stats
    }

    pub fn recent_events(&self, limit: Option<usize>) -> Vec<QueryRecord> {
        self.stats.recent_events(limit)
    }

    /// Get cache health score (0.0 to 1.0)
    pub fn health(&self) -> CacheHealth {
        let stats = self.stats();
        let hit_rate = stats.hit_rate();

        let memory = &self.config.memory;
        let memory_ratio = stats.memory_usage as f64 / memory.emergency_bytes as f64;
        let memory_score = if memory_ratio > 0.9 {
            0.5
        } else if memory_ratio > 0.5 {
            0.8
        } else {
            1.0
        };

        let total_requests = stats.total_requests();
        let eviction_rate = if total_requests == 0 {
            0.0
        } else {
            stats.evictions as f64 / total_requests as f64
        };
        let eviction_score = (1.0 - eviction_rate.min(1.0)).max(0.0);

        let overall = (hit_rate * 0.5) + (memory_score * 0.3) + (eviction_score * 0.2);

        CacheHealth {
            overall,
            hit_rate,
            memory_score,
            eviction_score,
            pressure: MemoryPressure::classify(stats.memory_usage, memory),
            recommendations: self.recommendations(&stats, eviction_rate),
        }
    }

    fn recommendations(&self, stats: &CacheStats, eviction_rate: f64) -> Vec<String> {
        let mut recommendations = Vec::new();

        if stats.total_requests() > 0 && stats.hit_rate() < 0.3 {
            recommendations.push(
                "Hit rate is low (<30%). Consider a longer TTL or warming frequently read tables."
                    .to_string(),
            );
        }

        if eviction_rate > 0.1 {
            recommendations.push(
                "High eviction rate (>10%). Consider increasing max_cache_size.".to_string(),
            );
        }

        if stats.memory_usage >= self.config.memory.warning_bytes {
            recommendations.push(
                "Memory usage is above the warning threshold. Reduce TTLs or cache smaller result sets."
                    .to_string(),
            );
        }

        if stats.errors > 0 && stats.errors * 10 > stats.misses {
            recommendations.push(
                "More than 10% of fetches fail. Check the data source connection.".to_string(),
            );
        }

        recommendations
    }

    /// Live entry lookup with access bookkeeping; removes the entry if expired
    fn lookup(&self, key: &str) -> Option<CacheEntry<V>> {
        let mut store = self.store.lock();
        let expired = store.get(key)?.is_expired();
        if expired {
            store.delete(key);
            drop(store);
            self.stats
                .record_eviction(key, EvictionReason::Expired.as_str());
            self.emit(CacheEvent::Evicted {
                key: key.to_string(),
                reason: EvictionReason::Expired,
            });
            return None;
        }
        store.touch(key).cloned()
    }

    fn emit(&self, event: CacheEvent) {
        // No subscribers is the common case
        let _ = self.events.send(event);
    }
}

impl<V: CacheValue> fmt::Debug for QueryCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCache")
            .field("entries", &self.len())
            .field("max_cache_size", &self.config.max_cache_size)
            .finish()
    }
}
