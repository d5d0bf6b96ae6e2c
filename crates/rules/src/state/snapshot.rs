//! Immutable copy of a [`RuleState`] taken under its lock.

use chrono::{DateTime, Utc};

use super::config::RuleStateConfig;
use super::core::RuleState;
use super::kind::RuleStateKind;
use super::throttle::count_in_window;

/// A consistent view of a rule instance at one instant.
///
/// Owns deep copies of both timestamp collections, so later mutation of the
/// source never shows through.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleStateSnapshot {
    pub rule_name: String,
    pub config: RuleStateConfig,
    pub state: RuleStateKind,
    pub state_reason: String,
    /// Timestamps still inside the sliding window as of the last throttle check.
    pub execution_timestamps: Vec<DateTime<Utc>>,
    pub all_execution_timestamps: Vec<DateTime<Utc>>,
    pub action_failure_count: u64,
}

impl RuleStateSnapshot {
    pub fn lifetime_occurrences(&self) -> usize {
        self.all_execution_timestamps.len()
    }

    pub fn sliding_window_occurrences(&self) -> usize {
        self.execution_timestamps.len()
    }

    /// Pure form of the throttle predicate: would a check at `now` throttle?
    ///
    /// Evaluates eviction on the copy without persisting anything and without
    /// touching the state.
    pub fn is_throttled_at(&self, now: DateTime<Utc>) -> bool {
        let Some(window) = self.config.action_count_sliding_window_duration else {
            return false;
        };
        count_in_window(&self.execution_timestamps, Some(window), now)
            >= self.config.action_count_limit as usize
    }

    pub fn oldest_window_timestamp(&self) -> Option<DateTime<Utc>> {
        self.execution_timestamps.iter().min().copied()
    }
}

impl From<&RuleState> for RuleStateSnapshot {
    fn from(state: &RuleState) -> Self {
        state.snapshot()
    }
}
