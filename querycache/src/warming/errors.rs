// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Warming task failures and their categorization

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use thiserror::Error;

static AUTH_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(auth\w*|unauthori[sz]ed|unauthenticated|forbidden|permission|denied|jwt|token expired|invalid token|401|403)\b",
    )
    .ok()
});

static NETWORK_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(network|fetch failed|timed? ?out|timeout|connection|econn\w*|socket|offline|unavailable|dns|502|503|504)\b",
    )
    .ok()
});

const RECENT_ERRORS: usize = 50;

/// Failure category of a warming task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Network,
    Auth,
    Other,
}

impl ErrorCategory {
    /// Categorize an error message. Auth wins over network so that
    /// "401 from upstream connection" is never retried.
    pub fn categorize(message: &str) -> Self {
        if matches_pattern(&AUTH_PATTERN, message) {
            ErrorCategory::Auth
        } else if matches_pattern(&NETWORK_PATTERN, message) {
            ErrorCategory::Network
        } else {
            ErrorCategory::Other
        }
    }

    /// Only transient network failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Network)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Auth => "auth",
            ErrorCategory::Other => "other",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn matches_pattern(pattern: &Option<Regex>, message: &str) -> bool {
    pattern.as_ref().is_some_and(|re| re.is_match(message))
}

/// Error returned by a warming executor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{category} error: {message}")]
pub struct WarmingTaskError {
    pub category: ErrorCategory,
    pub message: String,
}

impl WarmingTaskError {
    /// Build an error, inferring the category from the message
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            category: ErrorCategory::categorize(&message),
            message,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::with_category(ErrorCategory::Network, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::with_category(ErrorCategory::Auth, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::with_category(ErrorCategory::Other, message)
    }

    pub fn with_category(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category.is_retryable()
    }
}

impl From<crate::error::CacheError> for WarmingTaskError {
    fn from(error: crate::error::CacheError) -> Self {
        Self::other(error.to_string())
    }
}

/// A recorded warming failure
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub user_id: String,
    pub category: ErrorCategory,
    pub message: String,
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
}

/// Snapshot of the error handler
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorSummary {
    pub total: u64,
    pub by_category: BTreeMap<ErrorCategory, u64>,
    pub recent: Vec<ErrorRecord>,
}

/// Per-category failure counters plus a short history, oldest first
#[derive(Debug, Default)]
pub struct WarmingErrorHandler {
    state: Mutex<ErrorSummary>,
    recent: Mutex<VecDeque<ErrorRecord>>,
}

impl WarmingErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, user_id: &str, error: &WarmingTaskError, attempt: u32) {
        {
            let mut state = self.state.lock();
            state.total += 1;
            *state.by_category.entry(error.category).or_insert(0) += 1;
        }

        let mut recent = self.recent.lock();
        if recent.len() >= RECENT_ERRORS {
            recent.pop_front();
        }
        recent.push_back(ErrorRecord {
            user_id: user_id.to_string(),
            category: error.category,
            message: error.message.clone(),
            attempt,
            timestamp: Utc::now(),
        });
    }

    pub fn count(&self, category: ErrorCategory) -> u64 {
        self.state
            .lock()
            .by_category
            .get(&category)
            .copied()
            .unwrap_or(0)
    }

    pub fn summary(&self) -> ErrorSummary {
        let mut summary = self.state.lock().clone();
        summary.recent = self.recent.lock().iter().cloned().collect();
        summary
    }

    pub fn reset(&self) {
        *self.state.lock() = ErrorSummary::default();
        self.recent.lock().clear();
    }
}
