// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Context-aware warming decisions

use chrono::{DateTime, Duration, Local, Timelike, Utc};
use serde::{Deserialize, Serialize};

use super::queue::WarmingPriority;

/// Pages whose data users expect to be instant
const HIGH_VALUE_PAGES: &[&str] = &["dashboard", "home", "log-workout", "progress"];

/// Local hours with the most traffic (morning and evening sessions)
const PEAK_HOURS: [std::ops::RangeInclusive<u32>; 2] = [5..=9, 17..=21];

const RECENT_ACTIVITY_MINUTES: i64 = 30;
const STALE_ACTIVITY_DAYS: i64 = 7;

/// How a context-driven request is turned into queue tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarmingStrategy {
    /// Essential data first, secondary data as a separate low-priority task
    Progressive,
    /// Only the data behind the current page
    Targeted,
    /// One full warming task
    Standard,
}

/// Signals describing where the user is and how active they are
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WarmingContext {
    pub current_page: Option<String>,
    /// Local hour of day (0-23); the current hour when absent
    pub hour_of_day: Option<u32>,
    pub last_activity: Option<DateTime<Utc>>,
    pub is_new_session: bool,
}

/// Decision computed from a [`WarmingContext`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WarmingPlan {
    pub priority: WarmingPriority,
    pub strategy: WarmingStrategy,
    pub reasons: Vec<String>,
}

impl WarmingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, page: impl Into<String>) -> Self {
        self.current_page = Some(page.into());
        self
    }

    pub fn hour(mut self, hour: u32) -> Self {
        self.hour_of_day = Some(hour);
        self
    }

    pub fn last_activity(mut self, at: DateTime<Utc>) -> Self {
        self.last_activity = Some(at);
        self
    }

    pub fn new_session(mut self) -> Self {
        self.is_new_session = true;
        self
    }

    pub fn plan(&self) -> WarmingPlan {
        self.plan_at(Local::now())
    }

    /// Score the context at `now`: high-value page +2, peak hour +1, new
    /// session +1, activity in the last 30 minutes +1, no activity for a
    /// week -1. Scores of 3 and above are high priority, 1-2 normal, else low.
    pub fn plan_at(&self, now: DateTime<Local>) -> WarmingPlan {
        let mut score: i32 = 0;
        let mut reasons = Vec::new();

        if let Some(page) = self.current_page.as_deref() {
            if HIGH_VALUE_PAGES.contains(&page.to_ascii_lowercase().as_str()) {
                score += 2;
                reasons.push(format!("high-value page '{}'", page));
            }
        }

        let hour = self.hour_of_day.unwrap_or_else(|| now.hour()) % 24;
        if PEAK_HOURS.iter().any(|range| range.contains(&hour)) {
            score += 1;
            reasons.push(format!("peak hour {}", hour));
        }

        if self.is_new_session {
            score += 1;
            reasons.push("new session".to_string());
        }

        if let Some(last) = self.last_activity {
            let idle = now.with_timezone(&Utc) - last;
            if idle <= Duration::minutes(RECENT_ACTIVITY_MINUTES) {
                score += 1;
                reasons.push("recently active".to_string());
            } else if idle >= Duration::days(STALE_ACTIVITY_DAYS) {
                score -= 1;
                reasons.push("inactive for a week or more".to_string());
            }
        }

        let priority = match score {
            s if s >= 3 => WarmingPriority::High,
            s if s >= 1 => WarmingPriority::Normal,
            _ => WarmingPriority::Low,
        };

        let strategy = if self.is_new_session {
            WarmingStrategy::Progressive
        } else if self.current_page.is_some() {
            WarmingStrategy::Targeted
        } else {
            WarmingStrategy::Standard
        };

        WarmingPlan {
            priority,
            strategy,
            reasons,
        }
    }
}
