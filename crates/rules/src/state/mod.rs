//! Collection rule execution state machine.
//!
//! One [`RuleState`] exists per (target, rule) pair. It tracks whether the
//! rule is waiting for its trigger, executing its action list, throttled by
//! its sliding-window action count, or permanently finished, and keeps a
//! human-readable reason in step with every transition.

mod config;
mod core;
mod kind;
mod snapshot;
mod throttle;

#[cfg(test)]
mod tests;

pub use self::config::RuleStateConfig;
pub use self::core::RuleState;
pub use self::kind::{
    FinishReason, RuleStateKind, ACTION_COUNT_FINISHED_REASON, ACTION_EXECUTING_REASON,
    RULE_DURATION_FINISHED_REASON, RUNNING_REASON, STARTUP_FINISHED_REASON, THROTTLED_REASON,
};
pub use self::snapshot::RuleStateSnapshot;
pub(crate) use self::throttle::count_in_window;
