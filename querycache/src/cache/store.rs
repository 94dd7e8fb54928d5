// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Key -> entry storage with size accounting

use std::collections::HashMap;

use super::CacheEntry;

/// Mapping from cache key to entry.
///
/// The store keeps a running byte total and stamps every insert and access
/// with a monotonically increasing sequence number, which the eviction
/// strategies use to order entries by recency and age.
#[derive(Debug)]
pub struct CacheStore<V> {
    entries: HashMap<String, CacheEntry<V>>,
    total_size: usize,
    clock: u64,
}

impl<V> Default for CacheStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> CacheStore<V> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            total_size: 0,
            clock: 0,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            total_size: 0,
            clock: 0,
        }
    }

    /// Get an entry without touching its access metadata
    pub fn get(&self, key: &str) -> Option<&CacheEntry<V>> {
        self.entries.get(key)
    }

    /// Record an access on an entry and return it
    pub fn touch(&mut self, key: &str) -> Option<&CacheEntry<V>> {
        let seq = self.tick();
        let entry = self.entries.get_mut(key)?;
        entry.update_access();
        entry.access_seq = seq;
        Some(entry)
    }

    /// Insert or replace an entry, returning the previous one
    pub fn set(&mut self, key: String, mut entry: CacheEntry<V>) -> Option<CacheEntry<V>> {
        let seq = self.tick();
        entry.created_seq = seq;
        entry.access_seq = seq;
        self.total_size += entry.size;

        let previous = self.entries.insert(key, entry);
        if let Some(old) = &previous {
            self.total_size = self.total_size.saturating_sub(old.size);
        }
        previous
    }

    pub fn delete(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let removed = self.entries.remove(key)?;
        self.total_size = self.total_size.saturating_sub(removed.size);
        Some(removed)
    }

    /// Remove every entry matching the predicate, returning the removed keys
    pub fn remove_where<F>(&mut self, mut predicate: F) -> Vec<String>
    where
        F: FnMut(&str, &CacheEntry<V>) -> bool,
    {
        let doomed: Vec<String> = self
            .entries
            .iter()
            .filter(|(key, entry)| predicate(key, entry))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            self.delete(key);
        }
        doomed
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CacheEntry<V>)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of entry size estimates in bytes
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Key of the entry with the oldest access
    pub fn least_recently_used(&self) -> Option<&str> {
        self.entries
            .iter()
            .min_by_key(|(_, entry)| entry.access_seq)
            .map(|(key, _)| key.as_str())
    }

    /// Remove everything, returning the number of entries dropped
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.total_size = 0;
        count
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}
