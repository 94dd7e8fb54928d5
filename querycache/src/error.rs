// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Error types for the cache and warming layers

use thiserror::Error;

/// Errors raised by the cache service itself.
///
/// Failed fetches are not represented here: `get_with_cache` hands the
/// caller's own error back untouched.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),

    #[error("Key encoding error: {0}")]
    KeyEncoding(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Errors returned synchronously by the warming service before a task is queued
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WarmingError {
    #[error("A user id is required for cache warming")]
    MissingUserId,

    #[error("Invalid warming configuration: {0}")]
    InvalidConfig(String),
}
