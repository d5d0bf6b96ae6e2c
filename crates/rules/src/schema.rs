//! Collection rule YAML schema.
//!
//! A rule file describes one collection rule:
//!
//! ```yaml
//! name: high-cpu
//! trigger:
//!   type: EventCounter
//!   settings:
//!     counterName: cpu-usage
//!     greaterThan: 80
//! actions:
//!   - type: CollectTrace
//!     settings: { profile: Cpu }
//! limits:
//!   actionCount: 2
//!   actionCountSlidingWindowDuration: 1h
//!   ruleDuration: 1d
//! ```
//!
//! Trigger and action settings are kept opaque here; only the limits feed the
//! state machine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;
use crate::loader::{Result, RuleError};
use crate::state::RuleStateConfig;

/// Trigger type name that fires exactly once when the target connects.
pub const STARTUP_TRIGGER: &str = "Startup";

/// Shortest accepted sliding window or rule duration.
pub const MIN_LIMIT_DURATION: Duration = Duration::from_secs(1);

/// Longest accepted sliding window or rule duration (365 days).
pub const MAX_LIMIT_DURATION: Duration = Duration::from_secs(365 * 86_400);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CollectionRule {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub trigger: TriggerDefinition,
    #[serde(default)]
    pub actions: Vec<ActionDefinition>,
    #[serde(default)]
    pub limits: RuleLimits,
}

impl CollectionRule {
    pub fn is_startup(&self) -> bool {
        self.trigger.is_startup()
    }

    /// Reject rules the engine could never run.
    pub fn validate(&self, default_action_count: u32) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(RuleError::Validation("rule name must not be empty".to_string()));
        }
        if self.trigger.kind.trim().is_empty() {
            return Err(RuleError::Validation(format!(
                "rule '{}': trigger.type must not be empty",
                self.name
            )));
        }
        if let Some(i) = self.actions.iter().position(|a| a.kind.trim().is_empty()) {
            return Err(RuleError::Validation(format!(
                "rule '{}': actions[{}].type must not be empty",
                self.name, i
            )));
        }
        self.limits
            .to_state_config(default_action_count)
            .map_err(|e| match e {
                RuleError::Validation(msg) => {
                    RuleError::Validation(format!("rule '{}': {}", self.name, msg))
                }
                other => other,
            })?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TriggerDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub settings: Option<serde_yaml::Value>,
}

impl TriggerDefinition {
    pub fn is_startup(&self) -> bool {
        self.kind.eq_ignore_ascii_case(STARTUP_TRIGGER)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ActionDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub settings: Option<serde_yaml::Value>,
}

/// Unvalidated limits as written in a rule file.
///
/// Durations are strings in any form [`parse_duration`] accepts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RuleLimits {
    #[serde(default)]
    pub action_count: Option<u32>,
    #[serde(default)]
    pub action_count_sliding_window_duration: Option<String>,
    #[serde(default)]
    pub rule_duration: Option<String>,
}

impl RuleLimits {
    /// Validate into the config a [`RuleState`](crate::state::RuleState) is built from.
    ///
    /// `default_action_count` applies when `actionCount` is absent. Durations
    /// must parse and fall within [`MIN_LIMIT_DURATION`, `MAX_LIMIT_DURATION`].
    pub fn to_state_config(&self, default_action_count: u32) -> Result<RuleStateConfig> {
        Ok(RuleStateConfig {
            action_count_limit: self.action_count.unwrap_or(default_action_count),
            action_count_sliding_window_duration: bounded_duration(
                "actionCountSlidingWindowDuration",
                self.action_count_sliding_window_duration.as_deref(),
            )?,
            rule_duration: bounded_duration("ruleDuration", self.rule_duration.as_deref())?,
        })
    }
}

fn bounded_duration(field: &str, raw: Option<&str>) -> Result<Option<Duration>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let parsed = parse_duration(raw).ok_or_else(|| {
        RuleError::Validation(format!("limits.{}: cannot parse duration '{}'", field, raw))
    })?;
    if !(MIN_LIMIT_DURATION..=MAX_LIMIT_DURATION).contains(&parsed) {
        return Err(RuleError::Validation(format!(
            "limits.{}: '{}' must be between 1s and 365d",
            field, raw
        )));
    }
    Ok(Some(parsed))
}

fn default_true() -> bool {
    true
}
