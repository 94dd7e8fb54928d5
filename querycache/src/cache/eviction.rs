// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Capacity eviction and targeted cleanup strategies

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

use super::{CacheEntry, CacheStore};

/// Cleanup strategies, applied in declaration order under memory pressure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CleanupStrategy {
    /// Every expired entry
    Expired,
    /// Up to 100 least recently accessed entries
    LeastRecentlyUsed,
    /// Up to 100 oldest entries by creation
    Oldest,
    /// Up to 50 largest entries
    Largest,
}

impl CleanupStrategy {
    pub const ORDER: [CleanupStrategy; 4] = [
        CleanupStrategy::Expired,
        CleanupStrategy::LeastRecentlyUsed,
        CleanupStrategy::Oldest,
        CleanupStrategy::Largest,
    ];

    /// Maximum entries a single pass may remove, `None` for unbounded
    pub fn limit(&self) -> Option<usize> {
        match self {
            CleanupStrategy::Expired => None,
            CleanupStrategy::LeastRecentlyUsed => Some(100),
            CleanupStrategy::Oldest => Some(100),
            CleanupStrategy::Largest => Some(50),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CleanupStrategy::Expired => "expired",
            CleanupStrategy::LeastRecentlyUsed => "lru",
            CleanupStrategy::Oldest => "oldest",
            CleanupStrategy::Largest => "largest",
        }
    }

    /// Run this strategy once against the store
    pub fn apply<V>(&self, store: &mut CacheStore<V>) -> usize {
        let limit = self.limit().unwrap_or(usize::MAX);
        match self {
            CleanupStrategy::Expired => remove_expired(store, Instant::now()),
            CleanupStrategy::LeastRecentlyUsed => remove_least_recently_used(store, limit),
            CleanupStrategy::Oldest => remove_oldest(store, limit),
            CleanupStrategy::Largest => remove_largest(store, limit),
        }
    }
}

/// Outcome of a targeted cleanup
#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub target_fraction: f64,
    pub initial_size: usize,
    pub target_size: usize,
    pub final_size: usize,
    /// Entries removed by each strategy that ran, in execution order
    pub removed: Vec<(CleanupStrategy, usize)>,
    pub target_reached: bool,
    pub duration: Duration,
}

impl CleanupReport {
    pub fn total_removed(&self) -> usize {
        self.removed.iter().map(|(_, count)| count).sum()
    }

    pub fn bytes_freed(&self) -> usize {
        self.initial_size.saturating_sub(self.final_size)
    }
}

/// Make room for `key` when the store is at capacity.
///
/// Removes exactly one entry, the least recently used, when the store holds
/// `max_entries` or more and `key` is not already present. Replacing an
/// existing key never evicts.
pub fn evict_for_insert<V>(
    store: &mut CacheStore<V>,
    key: &str,
    max_entries: usize,
) -> Option<(String, CacheEntry<V>)> {
    if store.len() < max_entries || store.contains_key(key) {
        return None;
    }

    let victim = store.least_recently_used()?.to_string();
    let entry = store.delete(&victim)?;
    Some((victim, entry))
}

/// Remove all entries expired at `now`
pub fn remove_expired<V>(store: &mut CacheStore<V>, now: Instant) -> usize {
    store
        .remove_where(|_, entry| entry.is_expired_at(now))
        .len()
}

/// Remove up to `limit` least recently used entries
pub fn remove_least_recently_used<V>(store: &mut CacheStore<V>, limit: usize) -> usize {
    remove_ranked(store, limit, |entry| entry.access_seq)
}

/// Remove up to `limit` entries in creation order
pub fn remove_oldest<V>(store: &mut CacheStore<V>, limit: usize) -> usize {
    remove_ranked(store, limit, |entry| entry.created_seq)
}

/// Remove up to `limit` entries, largest first
pub fn remove_largest<V>(store: &mut CacheStore<V>, limit: usize) -> usize {
    remove_ranked(store, limit, |entry| std::cmp::Reverse(entry.size))
}

/// Run the cleanup strategies in order until the aggregate size is at or
/// below `initial * (1 - target_fraction)`.
pub fn perform_cleanup<V>(store: &mut CacheStore<V>, target_fraction: f64) -> CleanupReport {
    let started = Instant::now();
    let target_fraction = if target_fraction.is_finite() {
        target_fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };

    let initial_size = store.total_size();
    let target_size = (initial_size as f64 * (1.0 - target_fraction)).floor() as usize;
    let mut removed = Vec::with_capacity(CleanupStrategy::ORDER.len());

    for strategy in CleanupStrategy::ORDER {
        let count = strategy.apply(store);
        removed.push((strategy, count));
        if store.total_size() <= target_size {
            break;
        }
    }

    let final_size = store.total_size();
    CleanupReport {
        target_fraction,
        initial_size,
        target_size,
        final_size,
        removed,
        target_reached: final_size <= target_size,
        duration: started.elapsed(),
    }
}

fn remove_ranked<V, K, F>(store: &mut CacheStore<V>, limit: usize, rank: F) -> usize
where
    K: Ord,
    F: Fn(&CacheEntry<V>) -> K,
{
    let mut ranked: Vec<(K, String)> = store
        .iter()
        .map(|(key, entry)| (rank(entry), key.clone()))
        .collect();
    ranked.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    ranked
        .into_iter()
        .take(limit)
        .filter(|(_, key)| store.delete(key).is_some())
        .count()
}
