// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Priority queue of pending warming tasks

use chrono::{DateTime, Utc};
use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BinaryHeap, HashSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use super::errors::WarmingTaskError;
use crate::error::WarmingError;

/// Warming priority. Variants are ordered so that `High > Normal > Low`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum WarmingPriority {
    Low,
    #[default]
    Normal,
    High,
}

impl WarmingPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarmingPriority::Low => "low",
            WarmingPriority::Normal => "normal",
            WarmingPriority::High => "high",
        }
    }
}

impl fmt::Display for WarmingPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WarmingPriority {
    type Err = WarmingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(WarmingPriority::Low),
            "normal" | "medium" => Ok(WarmingPriority::Normal),
            "high" => Ok(WarmingPriority::High),
            other => Err(WarmingError::InvalidConfig(format!(
                "Unknown warming priority '{}'",
                other
            ))),
        }
    }
}

/// What part of a user's data a task warms
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarmingPhase {
    /// Everything the warmer knows how to load
    Full,
    /// Data needed for the first screen
    Essential,
    /// Data needed later in the session
    Secondary,
    /// Data for one named page
    Page(String),
}

impl fmt::Display for WarmingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarmingPhase::Full => f.write_str("full"),
            WarmingPhase::Essential => f.write_str("essential"),
            WarmingPhase::Secondary => f.write_str("secondary"),
            WarmingPhase::Page(page) => write!(f, "page:{}", page),
        }
    }
}

pub type WarmFuture = Pin<Box<dyn Future<Output = Result<(), WarmingTaskError>> + Send>>;

/// A re-runnable warming operation; called once per attempt
pub type WarmingExecutor = Arc<dyn Fn() -> WarmFuture + Send + Sync>;

/// Wrap an async closure as a [`WarmingExecutor`]
pub fn executor<F, Fut>(f: F) -> WarmingExecutor
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), WarmingTaskError>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()) as WarmFuture)
}

/// A queued or running warming request
#[derive(Clone)]
pub struct WarmingTask {
    pub id: Uuid,
    pub user_id: String,
    pub priority: WarmingPriority,
    pub phase: WarmingPhase,
    pub executor: WarmingExecutor,
    pub enqueued_at: DateTime<Utc>,
    /// Enqueue order, used as the FIFO tie-break within a priority
    pub sequence: u64,
    /// Attempts made so far
    pub attempts: u32,
}

impl WarmingTask {
    fn slot(&self) -> TaskSlot {
        (self.user_id.clone(), self.phase.clone())
    }
}

impl fmt::Debug for WarmingTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarmingTask")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("priority", &self.priority)
            .field("phase", &self.phase)
            .field("sequence", &self.sequence)
            .field("attempts", &self.attempts)
            .finish()
    }
}

type TaskSlot = (String, WarmingPhase);

#[derive(Clone, Copy)]
enum Dedupe {
    User,
    Phase,
}

struct QueuedTask(WarmingTask);

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.0.priority == other.0.priority && self.0.sequence == other.0.sequence
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Higher priority first, then lower sequence (older) first
        match self.0.priority.cmp(&other.0.priority) {
            std::cmp::Ordering::Equal => other.0.sequence.cmp(&self.0.sequence),
            other_ordering => other_ordering,
        }
    }
}

/// Queue sizes by priority
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueSizes {
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

impl QueueSizes {
    pub fn total(&self) -> usize {
        self.high + self.normal + self.low
    }
}

struct QueueState {
    heap: BinaryHeap<QueuedTask>,
    queued: HashSet<TaskSlot>,
    active: Option<TaskSlot>,
    next_sequence: u64,
}

/// Bounded priority queue with at most one active task.
///
/// A user with any queued or active task is rejected by `add_to_queue`
/// until the active run finishes. `add_phase` only rejects a repeat of the
/// same `(user, phase)` pair and is how a follow-up phase joins a user's
/// existing work.
pub struct WarmingQueue {
    max_queue_size: usize,
    state: Mutex<QueueState>,
}

impl WarmingQueue {
    pub fn new(max_queue_size: usize) -> Self {
        Self {
            max_queue_size,
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                queued: HashSet::new(),
                active: None,
                next_sequence: 0,
            }),
        }
    }

    /// Enqueue a task. Returns `Ok(false)` when the user already has a task
    /// queued or running, or when the queue is full.
    pub fn add_to_queue(
        &self,
        user_id: &str,
        priority: WarmingPriority,
        phase: WarmingPhase,
        executor: WarmingExecutor,
    ) -> Result<bool, WarmingError> {
        self.insert(user_id, priority, phase, executor, Dedupe::User)
    }

    /// Enqueue a task alongside the user's other phases. Returns `Ok(false)`
    /// only when this exact phase is already queued or running for the user,
    /// or when the queue is full.
    pub fn add_phase(
        &self,
        user_id: &str,
        priority: WarmingPriority,
        phase: WarmingPhase,
        executor: WarmingExecutor,
    ) -> Result<bool, WarmingError> {
        self.insert(user_id, priority, phase, executor, Dedupe::Phase)
    }

    fn insert(
        &self,
        user_id: &str,
        priority: WarmingPriority,
        phase: WarmingPhase,
        executor: WarmingExecutor,
        dedupe: Dedupe,
    ) -> Result<bool, WarmingError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(WarmingError::MissingUserId);
        }

        let mut state = self.state.lock();
        let slot = (user_id.to_string(), phase);

        let pending = match dedupe {
            Dedupe::User => {
                state.queued.iter().any(|(user, _)| user == &slot.0)
                    || state.active.as_ref().is_some_and(|(user, _)| user == &slot.0)
            }
            Dedupe::Phase => {
                state.queued.contains(&slot) || state.active.as_ref() == Some(&slot)
            }
        };
        if pending {
            debug!("Warming for {} ({}) already pending", slot.0, slot.1);
            return Ok(false);
        }

        if state.heap.len() >= self.max_queue_size {
            warn!(
                "Warming queue full ({} tasks), dropping {} ({})",
                state.heap.len(),
                slot.0,
                slot.1
            );
            return Ok(false);
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;

        let task = WarmingTask {
            id: Uuid::new_v4(),
            user_id: slot.0.clone(),
            priority,
            phase: slot.1.clone(),
            executor,
            enqueued_at: Utc::now(),
            sequence,
            attempts: 0,
        };
        state.queued.insert(slot);
        state.heap.push(QueuedTask(task));
        Ok(true)
    }

    /// Take the next task and mark it active. Returns `None` when the queue
    /// is empty or another task is still active.
    pub fn pop_next(&self) -> Option<WarmingTask> {
        let mut state = self.state.lock();
        if state.active.is_some() {
            return None;
        }

        let QueuedTask(task) = state.heap.pop()?;
        let slot = task.slot();
        state.queued.remove(&slot);
        state.active = Some(slot);
        Some(task)
    }

    /// Clear the active slot once `task` completed or failed terminally
    pub fn finish(&self, task: &WarmingTask) {
        let mut state = self.state.lock();
        if state.active.as_ref() == Some(&task.slot()) {
            state.active = None;
        }
    }

    /// Drop every queued task for `user_id`. A running task is left alone.
    pub fn remove_user(&self, user_id: &str) -> usize {
        let mut state = self.state.lock();
        let before = state.heap.len();
        state.heap.retain(|queued| queued.0.user_id != user_id);
        state.queued.retain(|(user, _)| user != user_id);
        before - state.heap.len()
    }

    pub fn total_queue_size(&self) -> usize {
        self.state.lock().heap.len()
    }

    pub fn size_by_priority(&self) -> QueueSizes {
        let state = self.state.lock();
        let mut sizes = QueueSizes::default();
        for queued in state.heap.iter() {
            match queued.0.priority {
                WarmingPriority::High => sizes.high += 1,
                WarmingPriority::Normal => sizes.normal += 1,
                WarmingPriority::Low => sizes.low += 1,
            }
        }
        sizes
    }

    pub fn is_queued(&self, user_id: &str) -> bool {
        self.state
            .lock()
            .queued
            .iter()
            .any(|(user, _)| user == user_id)
    }

    pub fn is_active(&self, user_id: &str) -> bool {
        self.state
            .lock()
            .active
            .as_ref()
            .is_some_and(|(user, _)| user == user_id)
    }

    pub fn active_user(&self) -> Option<String> {
        self.state.lock().active.as_ref().map(|(user, _)| user.clone())
    }

    /// Drop every queued task, returning how many were removed
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let removed = state.heap.len();
        state.heap.clear();
        state.queued.clear();
        removed
    }
}

impl fmt::Debug for WarmingQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarmingQueue")
            .field("max_queue_size", &self.max_queue_size)
            .field("queued", &self.total_queue_size())
            .field("active", &self.active_user())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> WarmingExecutor {
        executor(|| async { Ok(()) })
    }

    fn add(queue: &WarmingQueue, user: &str, priority: WarmingPriority) -> bool {
        queue
            .add_to_queue(user, priority, WarmingPhase::Full, noop())
            .unwrap()
    }

    #[test]
    fn test_duplicate_is_rejected() {
        let queue = WarmingQueue::new(10);
        assert!(add(&queue, "u1", WarmingPriority::High));
        assert!(!add(&queue, "u1", WarmingPriority::High));
        assert_eq!(queue.total_queue_size(), 1);
    }

    #[test]
    fn test_priority_then_fifo() {
        let queue = WarmingQueue::new(10);
        add(&queue, "low", WarmingPriority::Low);
        add(&queue, "normal-1", WarmingPriority::Normal);
        add(&queue, "high", WarmingPriority::High);
        add(&queue, "normal-2", WarmingPriority::Normal);

        let mut order = Vec::new();
        while let Some(task) = queue.pop_next() {
            order.push(task.user_id.clone());
            queue.finish(&task);
        }
        assert_eq!(order, vec!["high", "normal-1", "normal-2", "low"]);
    }

    #[test]
    fn test_active_task_blocks_duplicates_and_next_pop() {
        let queue = WarmingQueue::new(10);
        add(&queue, "u1", WarmingPriority::Normal);
        add(&queue, "u2", WarmingPriority::Normal);

        let task = queue.pop_next().unwrap();
        assert!(queue.is_active("u1"));
        assert!(!add(&queue, "u1", WarmingPriority::High));
        assert!(queue.pop_next().is_none());

        queue.finish(&task);
        assert!(add(&queue, "u1", WarmingPriority::High));
        assert_eq!(queue.pop_next().unwrap().user_id, "u1");
    }

    #[test]
    fn test_any_pending_phase_blocks_the_user() {
        let queue = WarmingQueue::new(10);
        assert!(queue
            .add_to_queue("u1", WarmingPriority::Low, WarmingPhase::Full, noop())
            .unwrap());
        assert!(!queue
            .add_to_queue(
                "u1",
                WarmingPriority::High,
                WarmingPhase::Page("dashboard".into()),
                noop()
            )
            .unwrap());

        let task = queue.pop_next().unwrap();
        assert!(!queue
            .add_to_queue("u1", WarmingPriority::High, WarmingPhase::Essential, noop())
            .unwrap());
        queue.finish(&task);
        assert!(queue
            .add_to_queue("u1", WarmingPriority::High, WarmingPhase::Essential, noop())
            .unwrap());
        assert_eq!(queue.total_queue_size(), 1);
    }

    #[test]
    fn test_add_phase_only_rejects_the_same_phase() {
        let queue = WarmingQueue::new(10);
        assert!(queue
            .add_to_queue("u1", WarmingPriority::High, WarmingPhase::Essential, noop())
            .unwrap());
        assert!(queue
            .add_phase("u1", WarmingPriority::Low, WarmingPhase::Secondary, noop())
            .unwrap());
        assert!(!queue
            .add_phase("u1", WarmingPriority::Low, WarmingPhase::Secondary, noop())
            .unwrap());
        assert_eq!(
            queue.size_by_priority(),
            QueueSizes {
                high: 1,
                normal: 0,
                low: 1
            }
        );
    }

    #[test]
    fn test_capacity() {
        let queue = WarmingQueue::new(2);
        assert!(add(&queue, "a", WarmingPriority::Low));
        assert!(add(&queue, "b", WarmingPriority::Low));
        assert!(!add(&queue, "c", WarmingPriority::High));
        assert_eq!(queue.total_queue_size(), 2);
    }

    #[test]
    fn test_missing_user_id() {
        let queue = WarmingQueue::new(2);
        let result = queue.add_to_queue("  ", WarmingPriority::Low, WarmingPhase::Full, noop());
        assert_eq!(result, Err(WarmingError::MissingUserId));
    }

    #[test]
    fn test_remove_user_leaves_active_task() {
        let queue = WarmingQueue::new(10);
        add(&queue, "u1", WarmingPriority::High);
        let _running = queue.pop_next().unwrap();
        queue
            .add_phase("u1", WarmingPriority::Low, WarmingPhase::Secondary, noop())
            .unwrap();
        add(&queue, "u2", WarmingPriority::Low);

        assert_eq!(queue.remove_user("u1"), 1);
        assert!(queue.is_active("u1"));
        assert!(!queue.is_queued("u1"));
        assert!(queue.is_queued("u2"));
        assert_eq!(queue.clear(), 1);
    }

    #[test]
    fn test_priority_parsing() {
        assert_eq!("HIGH".parse::<WarmingPriority>().unwrap(), WarmingPriority::High);
        assert_eq!("medium".parse::<WarmingPriority>().unwrap(), WarmingPriority::Normal);
        assert!("urgent".parse::<WarmingPriority>().is_err());
        assert_eq!(WarmingPhase::Page("dashboard".into()).to_string(), "page:dashboard");
    }
}
