// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! querycache - client-side query caching for a workout tracker
//!
//! An in-memory read-through cache that sits in front of the application's
//! backend data source.
//!
//! # Features
//!
//! - **TTL entries**: per-entry expiry with a configurable default
//! - **Bounded size**: LRU eviction at capacity, targeted cleanup under memory pressure
//! - **Scoped invalidation**: by key pattern, tag, table or user
//! - **Instrumentation**: hit rate, reads by table/hour/user, bandwidth and cost
//! - **Cache warming**: prioritized background prefetch with retries
//!
//! # Usage
//!
//! ```ignore
//! use querycache::{CacheConfig, CacheKeyBuilder, CacheOptions, QueryCache};
//!
//! let cache: QueryCache = QueryCache::new(CacheConfig::default())?;
//! let key = CacheKeyBuilder::new("workout_logs", "list").user("42").build();
//! let logs = cache
//!     .get_with_cache(&key, || fetch_logs("42"), &CacheOptions::new().table("workout_logs"))
//!     .await?;
//! ```

pub mod cache;
pub mod error;
pub mod warming;

pub use cache::{
    build_key, CacheConfig, CacheEntry, CacheEvent, CacheHealth, CacheKeyBuilder, CacheOptions,
    CacheStats, CacheValue, CleanupReport, CleanupStrategy, EnhancedStats, Fetched,
    InvalidateOptions, MaintenanceHandle, MemoryMonitor, MemoryPressure, QueryCache,
    StatisticsTracker,
};
pub use error::{CacheError, WarmingError};
pub use warming::{
    CacheWarmer, CacheWarmingService, WarmingContext, WarmingPhase, WarmingPriority,
    WarmingResponse, WarmingTaskError,
};

/// querycache version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// querycache crate name
pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");
