// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Pattern, tag, table and user scoped invalidation
//!
//! A pattern is matched against the cache key as a substring, but only on
//! segment boundaries: when the pattern starts (or ends) with an identifier
//! character (`[A-Za-z0-9_-]`), the key character just before (or after) the
//! match must not be one. `user_1` therefore matches `programs:user_1:{..}`
//! and `user_1` itself but not `user_10`.

use super::CacheEntry;

/// Filters applied on top of pattern matching
#[derive(Debug, Clone, Default)]
pub struct InvalidateOptions {
    /// Treat patterns as exact keys
    pub exact: bool,
    /// Entry must carry at least one of these tags
    pub tags: Vec<String>,
    /// Entry's table must be one of these
    pub tables: Vec<String>,
    /// Entry must belong to this user
    pub user_id: Option<String>,
}

impl InvalidateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exact(mut self) -> Self {
        self.exact = true;
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

    pub fn tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables.extend(tables.into_iter().map(Into::into));
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    fn has_filters(&self) -> bool {
        !self.tags.is_empty() || !self.tables.is_empty() || self.user_id.is_some()
    }
}

/// A compiled invalidation request
#[derive(Debug, Clone)]
pub struct InvalidationRule {
    patterns: Vec<String>,
    options: InvalidateOptions,
}

impl InvalidationRule {
    pub fn new<I, S>(patterns: I, options: InvalidateOptions) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| p.as_ref().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        Self { patterns, options }
    }

    /// True when the rule would remove every entry regardless of content
    pub fn matches_everything(&self) -> bool {
        self.patterns.is_empty() && !self.options.has_filters()
    }

    pub fn matches<V>(&self, key: &str, entry: &CacheEntry<V>) -> bool {
        self.matches_key(key) && self.matches_filters(entry)
    }

    fn matches_key(&self, key: &str) -> bool {
        // No patterns: the filters alone select entries
        if self.patterns.is_empty() {
            return true;
        }
        if self.options.exact {
            self.patterns.iter().any(|p| p == key)
        } else {
            self.patterns.iter().any(|p| pattern_matches(key, p))
        }
    }

    fn matches_filters<V>(&self, entry: &CacheEntry<V>) -> bool {
        let options = &self.options;

        if !options.tags.is_empty() && !options.tags.iter().any(|t| entry.has_tag(t)) {
            return false;
        }

        if !options.tables.is_empty() {
            match &entry.table {
                Some(table) if options.tables.iter().any(|t| t == table) => {}
                _ => return false,
            }
        }

        if let Some(user_id) = &options.user_id {
            if !entry_belongs_to_user(entry, user_id) {
                return false;
            }
        }

        true
    }
}

/// Boundary-aware substring match of `pattern` within `key`
pub fn pattern_matches(key: &str, pattern: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }

    let check_left = pattern.chars().next().is_some_and(is_identifier_char);
    let check_right = pattern.chars().next_back().is_some_and(is_identifier_char);

    // Candidates may overlap, so resume one char past each rejected start
    let mut from = 0;
    while let Some(offset) = key[from..].find(pattern) {
        let start = from + offset;
        let end = start + pattern.len();
        let left_ok = !check_left
            || key[..start]
                .chars()
                .next_back()
                .map_or(true, |c| !is_identifier_char(c));
        let right_ok = !check_right
            || key[end..]
                .chars()
                .next()
                .map_or(true, |c| !is_identifier_char(c));
        if left_ok && right_ok {
            return true;
        }
        from = start + key[start..].chars().next().map_or(1, char::len_utf8);
    }
    false
}

/// An entry belongs to a user when it was stored for that user or carries a
/// `user:<id>` (or bare `<id>`) tag.
pub fn entry_belongs_to_user<V>(entry: &CacheEntry<V>, user_id: &str) -> bool {
    if entry.user_id.as_deref() == Some(user_id) {
        return true;
    }
    entry.has_tag(user_id) || entry.has_tag(&user_tag(user_id))
}

pub fn user_tag(user_id: &str) -> String {
    format!("user:{}", user_id)
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}
