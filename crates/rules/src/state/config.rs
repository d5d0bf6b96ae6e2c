//! Validated limits a rule state is constructed with.

use std::time::Duration;

/// Limits of a single rule instance, already validated by the caller.
///
/// Built by [`RuleLimits::to_state_config`](crate::schema::RuleLimits::to_state_config)
/// or directly in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleStateConfig {
    /// Executions allowed per sliding window, or over the rule's lifetime
    /// when no window is set.
    pub action_count_limit: u32,
    pub action_count_sliding_window_duration: Option<Duration>,
    /// Watched by the pipeline; the state machine only reports it.
    pub rule_duration: Option<Duration>,
}

impl RuleStateConfig {
    pub fn new(action_count_limit: u32) -> Self {
        Self {
            action_count_limit,
            action_count_sliding_window_duration: None,
            rule_duration: None,
        }
    }

    pub fn with_sliding_window(mut self, window: Duration) -> Self {
        self.action_count_sliding_window_duration = Some(window);
        self
    }

    pub fn with_rule_duration(mut self, duration: Duration) -> Self {
        self.rule_duration = Some(duration);
        self
    }

    pub fn has_sliding_window(&self) -> bool {
        self.action_count_sliding_window_duration.is_some()
    }
}
