//! Read-only projection of rule state into its status wire format.
//!
//! Everything here works on [`RuleStateSnapshot`] values, never on a live
//! [`RuleState`](crate::state::RuleState), so a description can never mix
//! fields from before and after a transition.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sidecar_core::TargetId;

use crate::duration::nullable_clock;
use crate::registry::RuleStateRegistry;
use crate::state::{RuleStateKind, RuleStateSnapshot};

/// Detailed status of one rule on one target.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDescription {
    pub state: RuleStateKind,
    pub state_reason: String,
    pub action_count_limit: Option<u32>,
    #[serde(serialize_with = "nullable_clock::serialize")]
    pub action_count_sliding_window_duration_limit: Option<Duration>,
    pub lifetime_occurrences: usize,
    pub sliding_window_occurrences: usize,
    #[serde(serialize_with = "nullable_clock::serialize")]
    pub rule_finished_countdown: Option<Duration>,
    #[serde(serialize_with = "nullable_clock::serialize")]
    pub sliding_window_duration_countdown: Option<Duration>,
    /// Action lists that failed; the state itself returns to `Running`.
    pub action_failure_count: u64,
}

/// State and reason only, for per-target listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSummary {
    pub state: RuleStateKind,
    pub state_reason: String,
}

impl From<&RuleStateSnapshot> for RuleSummary {
    fn from(snapshot: &RuleStateSnapshot) -> Self {
        Self {
            state: snapshot.state,
            state_reason: snapshot.state_reason.clone(),
        }
    }
}

/// Time left before a rule finishes or its throttle lifts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Countdowns {
    pub rule_finished: Option<Duration>,
    pub sliding_window: Option<Duration>,
}

impl Countdowns {
    /// Countdowns for `snapshot` at `now`, given when its pipeline started.
    ///
    /// The rule-finished countdown needs a rule duration, a start time and a
    /// rule that has not finished yet. The sliding-window countdown is only
    /// reported while throttled and counts down to the oldest windowed
    /// execution leaving the window. Both clamp at zero.
    pub fn compute(
        snapshot: &RuleStateSnapshot,
        now: DateTime<Utc>,
        started_at: Option<DateTime<Utc>>,
    ) -> Self {
        let rule_finished = match (snapshot.config.rule_duration, started_at) {
            (Some(limit), Some(start)) if !snapshot.state.is_terminal() => {
                Some(limit.saturating_sub(elapsed(start, now)))
            }
            _ => None,
        };

        let sliding_window = match (
            snapshot.state,
            snapshot.config.action_count_sliding_window_duration,
            snapshot.oldest_window_timestamp(),
        ) {
            (RuleStateKind::Throttled, Some(window), Some(oldest)) => {
                Some(window.saturating_sub(elapsed(oldest, now)))
            }
            _ => None,
        };

        Self {
            rule_finished,
            sliding_window,
        }
    }
}

/// Build the wire description from a snapshot and externally supplied
/// counts and countdowns. Pure; takes no locks.
pub fn project(
    snapshot: &RuleStateSnapshot,
    lifetime_occurrences: usize,
    sliding_window_occurrences: usize,
    countdowns: Countdowns,
) -> RuleDescription {
    RuleDescription {
        state: snapshot.state,
        state_reason: snapshot.state_reason.clone(),
        action_count_limit: Some(snapshot.config.action_count_limit),
        action_count_sliding_window_duration_limit: snapshot
            .config
            .action_count_sliding_window_duration,
        lifetime_occurrences,
        sliding_window_occurrences,
        rule_finished_countdown: countdowns.rule_finished,
        sliding_window_duration_countdown: countdowns.sliding_window,
        action_failure_count: snapshot.action_failure_count,
    }
}

/// Describe a snapshot at `now`, deriving counts and countdowns from it.
pub fn describe(
    snapshot: &RuleStateSnapshot,
    now: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
) -> RuleDescription {
    let sliding = crate::state::count_in_window(
        &snapshot.execution_timestamps,
        snapshot.config.action_count_sliding_window_duration,
        now,
    );
    project(
        snapshot,
        snapshot.lifetime_occurrences(),
        sliding,
        Countdowns::compute(snapshot, now, started_at),
    )
}

/// Rule name → description for every rule of `target`.
pub fn describe_target(
    registry: &RuleStateRegistry,
    target: TargetId,
    now: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
) -> BTreeMap<String, RuleDescription> {
    registry
        .rules_for_target(target)
        .iter()
        .map(|snap| (snap.rule_name.clone(), describe(snap, now, started_at)))
        .collect()
}

/// Rule name → summary for every rule of `target`.
pub fn summarize_target(
    registry: &RuleStateRegistry,
    target: TargetId,
) -> BTreeMap<String, RuleSummary> {
    registry
        .rules_for_target(target)
        .iter()
        .map(|snap| (snap.rule_name.clone(), RuleSummary::from(snap)))
        .collect()
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}
