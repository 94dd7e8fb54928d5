// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Cache warming service
//!
//! Requests are validated and enqueued synchronously; a single background
//! processor drains the queue one task at a time. Task failures are
//! categorized, counted and retried when transient, and never stop the
//! processor.

use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;

use crate::cache::{
    stats::{StatisticsTracker, WarmingRunStats},
    CacheValue, QueryCache, WarmingConfig,
};
use crate::error::WarmingError;

use super::context::{WarmingContext, WarmingStrategy};
use super::errors::{ErrorSummary, WarmingErrorHandler, WarmingTaskError};
use super::queue::{
    QueueSizes, WarmFuture, WarmingExecutor, WarmingPhase, WarmingPriority, WarmingQueue,
    WarmingTask,
};

/// Application hook that loads a user's data into the cache.
///
/// Implementations typically call [`QueryCache::get_with_cache`] for each
/// query behind the requested phase.
#[async_trait]
pub trait CacheWarmer: Send + Sync + 'static {
    async fn warm(&self, user_id: &str, phase: &WarmingPhase) -> Result<(), WarmingTaskError>;
}

/// Outcome of a warming request
#[derive(Debug, Clone, Serialize)]
pub struct WarmingResponse {
    /// True when at least one task was enqueued
    pub success: bool,
    pub message: String,
    pub user_id: String,
    pub priority: WarmingPriority,
    pub strategy: Option<WarmingStrategy>,
    pub tasks_queued: usize,
    pub queue_size: usize,
}

/// Snapshot of the warming service
#[derive(Debug, Clone, Serialize)]
pub struct WarmingServiceStats {
    pub queue: QueueSizes,
    pub active_user: Option<String>,
    pub is_processing: bool,
    pub runs: WarmingRunStats,
    pub errors: ErrorSummary,
}

/// Schedules and runs warming tasks. Cloning shares the same queue.
#[derive(Clone)]
pub struct CacheWarmingService {
    config: WarmingConfig,
    warmer: Arc<dyn CacheWarmer>,
    queue: Arc<WarmingQueue>,
    stats: Arc<StatisticsTracker>,
    errors: Arc<WarmingErrorHandler>,
    processing: Arc<AtomicBool>,
}

impl CacheWarmingService {
    pub fn new(
        config: WarmingConfig,
        warmer: Arc<dyn CacheWarmer>,
        stats: Arc<StatisticsTracker>,
    ) -> Result<Self, WarmingError> {
        config.validate()?;
        Ok(Self {
            queue: Arc::new(WarmingQueue::new(config.max_queue_size)),
            config,
            warmer,
            stats,
            errors: Arc::new(WarmingErrorHandler::new()),
            processing: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Build a service that uses the cache's warming settings and statistics
    pub fn for_cache<V: CacheValue>(
        cache: &QueryCache<V>,
        warmer: Arc<dyn CacheWarmer>,
    ) -> Result<Self, WarmingError> {
        Self::new(cache.config().warming.clone(), warmer, cache.statistics())
    }

    pub fn config(&self) -> &WarmingConfig {
        &self.config
    }

    pub fn error_handler(&self) -> Arc<WarmingErrorHandler> {
        Arc::clone(&self.errors)
    }

    /// Queue a full warm for `user_id`
    pub fn add_to_queue(
        &self,
        user_id: &str,
        priority: WarmingPriority,
    ) -> Result<bool, WarmingError> {
        self.enqueue(user_id, priority, WarmingPhase::Full)
    }

    /// Queue a custom executor, bypassing the configured warmer. Rejected
    /// like `add_to_queue` when the user already has pending work.
    pub fn add_task(
        &self,
        user_id: &str,
        priority: WarmingPriority,
        phase: WarmingPhase,
        executor: WarmingExecutor,
    ) -> Result<bool, WarmingError> {
        let added = self.queue.add_to_queue(user_id, priority, phase, executor)?;
        if added {
            self.schedule_processing();
        }
        Ok(added)
    }

    pub fn warm_user_cache(
        &self,
        user_id: &str,
        priority: WarmingPriority,
    ) -> Result<WarmingResponse, WarmingError> {
        let queued = usize::from(self.add_to_queue(user_id, priority)?);
        Ok(self.response(user_id, priority, None, queued))
    }

    /// Pick priority and strategy from `context`, then enqueue accordingly
    pub fn smart_warm_cache(
        &self,
        user_id: &str,
        context: &WarmingContext,
    ) -> Result<WarmingResponse, WarmingError> {
        validate_user_id(user_id)?;
        let plan = context.plan();
        debug!(
            "Smart warming for {}: {} / {:?} ({})",
            user_id,
            plan.priority,
            plan.strategy,
            plan.reasons.join(", ")
        );

        let queued = match plan.strategy {
            WarmingStrategy::Progressive => {
                self.enqueue_progressive(user_id, plan.priority.max(WarmingPriority::Normal))?
            }
            WarmingStrategy::Targeted => {
                let phase = match &context.current_page {
                    Some(page) => WarmingPhase::Page(page.clone()),
                    None => WarmingPhase::Full,
                };
                usize::from(self.enqueue(user_id, plan.priority, phase)?)
            }
            WarmingStrategy::Standard => {
                usize::from(self.enqueue(user_id, plan.priority, WarmingPhase::Full)?)
            }
        };

        Ok(self.response(user_id, plan.priority, Some(plan.strategy), queued))
    }

    /// Queue essential data at high priority and secondary data at low priority
    pub fn progressive_warm_cache(&self, user_id: &str) -> Result<WarmingResponse, WarmingError> {
        validate_user_id(user_id)?;
        let queued = self.enqueue_progressive(user_id, WarmingPriority::High)?;
        Ok(self.response(
            user_id,
            WarmingPriority::High,
            Some(WarmingStrategy::Progressive),
            queued,
        ))
    }

    /// Drain the queue, one task at a time. Concurrent callers return
    /// immediately with 0 while another drain is running.
    pub async fn process_queue(&self) -> usize {
        let mut processed = 0;
        loop {
            if self
                .processing
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return processed;
            }

            {
                let _guard = ProcessingGuard(&self.processing);
                while let Some(task) = self.queue.pop_next() {
                    self.run_task(task).await;
                    processed += 1;
                }
            }

            // A task enqueued while the flag was still set saw the processor
            // as busy; pick it up here.
            if self.queue.total_queue_size() == 0 {
                if processed > 0 {
                    info!("Warming queue drained after {} tasks", processed);
                }
                return processed;
            }
        }
    }

    /// Drop queued (not running) tasks for `user_id`
    pub fn remove_user_from_warming_queue(&self, user_id: &str) -> usize {
        let removed = self.queue.remove_user(user_id);
        if removed > 0 {
            debug!("Removed {} queued warming tasks for {}", removed, user_id);
        }
        removed
    }

    pub fn total_queue_size(&self) -> usize {
        self.queue.total_queue_size()
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    pub fn warming_stats(&self) -> WarmingServiceStats {
        WarmingServiceStats {
            queue: self.queue.size_by_priority(),
            active_user: self.queue.active_user(),
            is_processing: self.is_processing(),
            runs: self.stats.warming_stats(),
            errors: self.errors.summary(),
        }
    }

    /// Delay before the retry following attempt number `attempt` (1-based)
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let delays = &self.config.retry_delays;
        let Some(last) = delays.len().checked_sub(1) else {
            return Duration::ZERO;
        };
        let index = (attempt.saturating_sub(1) as usize).min(last);
        let base = delays[index];

        if self.config.retry_jitter > 0.0 {
            base + base.mul_f64(fastrand::f64() * self.config.retry_jitter)
        } else {
            base
        }
    }

    fn enqueue(
        &self,
        user_id: &str,
        priority: WarmingPriority,
        phase: WarmingPhase,
    ) -> Result<bool, WarmingError> {
        let executor = self.warmer_executor(user_id, phase.clone());
        self.add_task(user_id, priority, phase, executor)
    }

    /// The secondary phase is only queued behind an essential phase this
    /// call managed to queue.
    fn enqueue_progressive(
        &self,
        user_id: &str,
        essential_priority: WarmingPriority,
    ) -> Result<usize, WarmingError> {
        if !self.enqueue(user_id, essential_priority, WarmingPhase::Essential)? {
            return Ok(0);
        }

        let phase = WarmingPhase::Secondary;
        let executor = self.warmer_executor(user_id, phase.clone());
        let secondary = self
            .queue
            .add_phase(user_id, WarmingPriority::Low, phase, executor)?;
        if secondary {
            self.schedule_processing();
        }
        Ok(1 + usize::from(secondary))
    }

    fn warmer_executor(&self, user_id: &str, phase: WarmingPhase) -> WarmingExecutor {
        let warmer = Arc::clone(&self.warmer);
        let user_id = user_id.to_string();
        Arc::new(move || {
            let warmer = Arc::clone(&warmer);
            let user_id = user_id.clone();
            let phase = phase.clone();
            Box::pin(async move { warmer.warm(&user_id, &phase).await }) as WarmFuture
        })
    }

    fn schedule_processing(&self) {
        if !self.config.auto_process || self.is_processing() {
            return;
        }
        // Without a runtime the caller drives `process_queue` itself
        if let Ok(handle) = Handle::try_current() {
            let service = self.clone();
            handle.spawn(async move {
                service.process_queue().await;
            });
        }
    }

    async fn run_task(&self, mut task: WarmingTask) -> bool {
        let _active = ActiveTaskGuard {
            queue: &self.queue,
            task: task.clone(),
        };
        let started = Instant::now();
        let max_attempts = self.config.max_attempts.max(1);

        let outcome = loop {
            task.attempts += 1;
            match (task.executor)().await {
                Ok(()) => break Ok(()),
                Err(err) => {
                    self.errors.record(&task.user_id, &err, task.attempts);
                    if err.is_retryable() && task.attempts < max_attempts {
                        let delay = self.retry_delay(task.attempts);
                        warn!(
                            "Warming {} ({}) attempt {}/{} failed: {}; retrying in {:?}",
                            task.user_id, task.phase, task.attempts, max_attempts, err, delay
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    break Err(err);
                }
            }
        };

        let duration = started.elapsed();
        match &outcome {
            Ok(()) => {
                debug!(
                    "Warmed {} ({}) in {:?} after {} attempt(s)",
                    task.user_id, task.phase, duration, task.attempts
                );
                self.stats
                    .record_warming(&task.user_id, true, duration, task.attempts, None);
            }
            Err(err) => {
                error!(
                    "Warming {} ({}) failed after {} attempt(s): {}",
                    task.user_id, task.phase, task.attempts, err
                );
                self.stats.record_warming(
                    &task.user_id,
                    false,
                    duration,
                    task.attempts,
                    Some(err.category.as_str()),
                );
            }
        }
        outcome.is_ok()
    }

    fn response(
        &self,
        user_id: &str,
        priority: WarmingPriority,
        strategy: Option<WarmingStrategy>,
        tasks_queued: usize,
    ) -> WarmingResponse {
        let message = if tasks_queued > 0 {
            format!("Queued {} warming task(s) for {}", tasks_queued, user_id)
        } else {
            format!(
                "Warming for {} is already pending or the queue is full",
                user_id
            )
        };
        WarmingResponse {
            success: tasks_queued > 0,
            message,
            user_id: user_id.to_string(),
            priority,
            strategy,
            tasks_queued,
            queue_size: self.queue.total_queue_size(),
        }
    }
}

impl fmt::Debug for CacheWarmingService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheWarmingService")
            .field("config", &self.config)
            .field("queue", &self.queue)
            .field("processing", &self.is_processing())
            .finish()
    }
}

fn validate_user_id(user_id: &str) -> Result<(), WarmingError> {
    if user_id.trim().is_empty() {
        Err(WarmingError::MissingUserId)
    } else {
        Ok(())
    }
}

struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Releases the queue's active slot even if the executor panics
struct ActiveTaskGuard<'a> {
    queue: &'a WarmingQueue,
    task: WarmingTask,
}

impl Drop for ActiveTaskGuard<'_> {
    fn drop(&mut self) {
        self.queue.finish(&self.task);
    }
}
