// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Background cache warming
//!
//! - Priority queue with per-user deduplication
//! - Context-aware priority and strategy selection
//! - Retry with a bounded delay schedule for transient failures

pub mod context;
pub mod errors;
pub mod queue;
pub mod service;

pub use context::{WarmingContext, WarmingPlan, WarmingStrategy};
pub use errors::{ErrorCategory, ErrorSummary, WarmingErrorHandler, WarmingTaskError};
pub use queue::{
    executor, QueueSizes, WarmFuture, WarmingExecutor, WarmingPhase, WarmingPriority,
    WarmingQueue, WarmingTask,
};
pub use service::{CacheWarmer, CacheWarmingService, WarmingResponse, WarmingServiceStats};
