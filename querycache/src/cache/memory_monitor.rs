// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Memory pressure monitoring and periodic maintenance
//!
//! The monitor samples the cache's estimated byte total on a fixed interval,
//! classifies it against the configured thresholds and asks the cache for a
//! targeted cleanup as pressure rises. It is a control loop, not a hard
//! limit: inserts between two checks may overshoot any threshold.

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::{CacheValue, CleanupReport, MemoryThresholds, QueryCache};

/// Memory pressure level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryPressure {
    Normal,
    Warning,
    Critical,
    Emergency,
}

impl MemoryPressure {
    pub fn classify(usage: usize, thresholds: &MemoryThresholds) -> Self {
        if usage >= thresholds.emergency_bytes {
            MemoryPressure::Emergency
        } else if usage >= thresholds.critical_bytes {
            MemoryPressure::Critical
        } else if usage >= thresholds.warning_bytes {
            MemoryPressure::Warning
        } else {
            MemoryPressure::Normal
        }
    }

    /// Fraction of the cached bytes to reclaim at this level
    pub fn reduction_target(&self) -> Option<f64> {
        match self {
            MemoryPressure::Normal => None,
            MemoryPressure::Warning => Some(0.2),
            MemoryPressure::Critical => Some(0.3),
            MemoryPressure::Emergency => Some(0.5),
        }
    }
}

impl fmt::Display for MemoryPressure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemoryPressure::Normal => "normal",
            MemoryPressure::Warning => "warning",
            MemoryPressure::Critical => "critical",
            MemoryPressure::Emergency => "emergency",
        };
        f.write_str(name)
    }
}

/// Outcome of one monitor check
#[derive(Debug, Clone, Serialize)]
pub struct MemoryCheck {
    pub usage: usize,
    pub pressure: MemoryPressure,
    pub cleanup: Option<CleanupReport>,
    pub usage_after: usize,
}

/// Monitor counters
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStats {
    pub checks: u64,
    pub cleanups: u64,
    pub peak_usage: usize,
    pub current_usage: usize,
    pub last_pressure: MemoryPressure,
}

/// Periodic memory checker bound to one cache
pub struct MemoryMonitor<V: CacheValue> {
    cache: Arc<QueryCache<V>>,
    thresholds: MemoryThresholds,
    peak: AtomicUsize,
    checks: AtomicU64,
    cleanups: AtomicU64,
    last_pressure: Mutex<MemoryPressure>,
}

impl<V: CacheValue> MemoryMonitor<V> {
    /// Create a monitor using the cache's own thresholds
    pub fn new(cache: Arc<QueryCache<V>>) -> Self {
        let thresholds = cache.config().memory.clone();
        Self::with_thresholds(cache, thresholds)
    }

    pub fn with_thresholds(cache: Arc<QueryCache<V>>, thresholds: MemoryThresholds) -> Self {
        Self {
            cache,
            thresholds,
            peak: AtomicUsize::new(0),
            checks: AtomicU64::new(0),
            cleanups: AtomicU64::new(0),
            last_pressure: Mutex::new(MemoryPressure::Normal),
        }
    }

    /// Sample usage once and clean up if above the warning threshold
    pub fn check(&self) -> MemoryCheck {
        let usage = self.cache.memory_usage();
        self.peak.fetch_max(usage, Ordering::SeqCst);
        self.checks.fetch_add(1, Ordering::SeqCst);

        let pressure = MemoryPressure::classify(usage, &self.thresholds);
        *self.last_pressure.lock() = pressure;

        let cleanup = pressure.reduction_target().map(|fraction| {
            warn!(
                "Memory pressure {}: {} cached, reclaiming {:.0}%",
                pressure,
                format_bytes(usage),
                fraction * 100.0
            );
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            self.cache.perform_cleanup(fraction)
        });

        if cleanup.is_none() {
            debug!("Memory check: {} cached", format_bytes(usage));
        }

        MemoryCheck {
            usage,
            pressure,
            usage_after: self.cache.memory_usage(),
            cleanup,
        }
    }

    pub fn stats(&self) -> MonitorStats {
        MonitorStats {
            checks: self.checks.load(Ordering::SeqCst),
            cleanups: self.cleanups.load(Ordering::SeqCst),
            peak_usage: self.peak.load(Ordering::SeqCst),
            current_usage: self.cache.memory_usage(),
            last_pressure: *self.last_pressure.lock(),
        }
    }

    /// Run [`MemoryMonitor::check`] every `monitor_interval` on the current
    /// tokio runtime until the handle is dropped.
    pub fn spawn(self: Arc<Self>) -> MaintenanceHandle {
        let period = self.thresholds.monitor_interval;
        info!("Starting memory monitor every {:?}", period);
        MaintenanceHandle::every(period, move || {
            self.check();
        })
    }
}

impl<V: CacheValue> fmt::Debug for MemoryMonitor<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryMonitor")
            .field("thresholds", &self.thresholds)
            .field("peak", &self.peak.load(Ordering::SeqCst))
            .field("checks", &self.checks.load(Ordering::SeqCst))
            .finish()
    }
}

/// Remove expired entries every `cleanup_interval` until the handle is dropped
pub fn spawn_expiry_sweep<V: CacheValue>(cache: Arc<QueryCache<V>>) -> MaintenanceHandle {
    let period = cache.config().cleanup_interval;
    MaintenanceHandle::every(period, move || {
        let removed = cache.cleanup();
        if removed > 0 {
            info!("Expiry sweep removed {} entries", removed);
        }
    })
}

/// Handle to a background maintenance task. Dropping it aborts the task.
#[derive(Debug)]
pub struct MaintenanceHandle {
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    fn every<F>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let task = tokio::spawn(async move {
            // First tick one period from now, not immediately
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tick();
            }
        });
        Self { task }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn stop(self) {
        drop(self)
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Format a byte count for log output
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
