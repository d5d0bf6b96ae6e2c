//! Lifecycle states and their fixed operator-facing reasons.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a rule instance is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleStateKind {
    Running,
    ActionExecuting,
    Throttled,
    Finished,
}

impl RuleStateKind {
    pub fn is_terminal(self) -> bool {
        self == RuleStateKind::Finished
    }
}

impl fmt::Display for RuleStateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleStateKind::Running => write!(f, "Running"),
            RuleStateKind::ActionExecuting => write!(f, "ActionExecuting"),
            RuleStateKind::Throttled => write!(f, "Throttled"),
            RuleStateKind::Finished => write!(f, "Finished"),
        }
    }
}

pub const RUNNING_REASON: &str =
    "This collection rule is active and waiting for its triggering conditions to be satisfied.";

pub const ACTION_EXECUTING_REASON: &str = "This collection rule has had its triggering conditions satisfied and is currently executing its action list.";

pub const THROTTLED_REASON: &str = "This collection rule is temporarily throttled because the ActionCountLimit has been reached within the ActionCountSlidingWindowDuration.";

pub const STARTUP_FINISHED_REASON: &str =
    "The collection rule will no longer trigger because the Startup trigger only executes once.";

pub const RULE_DURATION_FINISHED_REASON: &str =
    "The collection rule will no longer trigger because the RuleDuration limit was reached.";

pub const ACTION_COUNT_FINISHED_REASON: &str =
    "The collection rule will no longer trigger because the ActionCount limit was reached.";

const FAILURE_REASON_PREFIX: &str =
    "The collection rule will no longer trigger because a failure occurred with message: ";

/// Why a rule reached `Finished`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    StartupTriggerCompleted,
    RuleDurationReached,
    ActionCountReached,
    Failure(String),
}

impl FinishReason {
    pub fn reason(&self) -> String {
        match self {
            FinishReason::StartupTriggerCompleted => STARTUP_FINISHED_REASON.to_string(),
            FinishReason::RuleDurationReached => RULE_DURATION_FINISHED_REASON.to_string(),
            FinishReason::ActionCountReached => ACTION_COUNT_FINISHED_REASON.to_string(),
            FinishReason::Failure(message) => format!("{}{}", FAILURE_REASON_PREFIX, message),
        }
    }
}
