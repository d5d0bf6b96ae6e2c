//! [`RuleState`]: the per-(target, rule) lifecycle state machine.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::config::RuleStateConfig;
use super::kind::{
    FinishReason, RuleStateKind, ACTION_EXECUTING_REASON, RUNNING_REASON, THROTTLED_REASON,
};
use super::snapshot::RuleStateSnapshot;
use super::throttle::SlidingWindowThrottle;

/// Lifecycle state of one collection rule on one target.
///
/// Transitions:
///
/// ```text
/// Running ──begin──▶ ActionExecuting ──succeeded/failed──▶ Running
/// Running ◀──check (under limit)── Throttled ◀──check (limit reached)── Running
/// any non-terminal ──startup/duration/count/failure──▶ Finished
/// ```
///
/// State, reason and execution history sit behind a single mutex. The lock is
/// only ever held over in-memory updates, never across an await or a call
/// into a collaborator.
///
/// Once `Finished`, every later call is absorbed silently: an executor
/// reporting back after a terminal transition raced it is expected.
///
/// Other illegal transitions (ending an execution that never began, beginning
/// one while throttled, ...) are defects in the calling pipeline. Debug builds
/// assert on them; release builds and unit tests log and ignore them. The
/// `strict-transitions` feature makes them panic in every build.
#[derive(Debug)]
pub struct RuleState {
    rule_name: String,
    config: RuleStateConfig,
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    state: RuleStateKind,
    reason: String,
    throttle: SlidingWindowThrottle,
    action_failures: u64,
}

impl Inner {
    fn set(&mut self, state: RuleStateKind, reason: impl Into<String>) {
        self.state = state;
        self.reason = reason.into();
    }
}

impl RuleState {
    /// A fresh instance in `Running`.
    pub fn new(rule_name: impl Into<String>, config: RuleStateConfig) -> Self {
        let throttle = SlidingWindowThrottle::new(
            config.action_count_limit,
            config.action_count_sliding_window_duration,
        );
        Self {
            rule_name: rule_name.into(),
            config,
            inner: Mutex::new(Inner {
                state: RuleStateKind::Running,
                reason: RUNNING_REASON.to_string(),
                throttle,
                action_failures: 0,
            }),
        }
    }

    pub fn rule_name(&self) -> &str {
        &self.rule_name
    }

    pub fn config(&self) -> &RuleStateConfig {
        &self.config
    }

    pub fn state(&self) -> RuleStateKind {
        self.lock().state
    }

    pub fn state_reason(&self) -> String {
        self.lock().reason.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Consistent deep copy of every field, taken under the lock.
    pub fn snapshot(&self) -> RuleStateSnapshot {
        let inner = self.lock();
        RuleStateSnapshot {
            rule_name: self.rule_name.clone(),
            config: self.config.clone(),
            state: inner.state,
            state_reason: inner.reason.clone(),
            execution_timestamps: inner.throttle.window_timestamps(),
            all_execution_timestamps: inner.throttle.all_timestamps(),
            action_failure_count: inner.action_failures,
        }
    }

    // ── Action list lifecycle ────────────────────────────────────

    /// Mark the action list as started. Legal only from `Running`.
    ///
    /// Returns `false` when the transition was not taken; the caller must
    /// then skip the action list.
    pub fn begin_action_execution(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            RuleStateKind::Running => {
                inner.set(RuleStateKind::ActionExecuting, ACTION_EXECUTING_REASON);
                debug!(rule = %self.rule_name, "action list executing");
                true
            }
            RuleStateKind::Finished => {
                debug!(rule = %self.rule_name, "rule finished, not starting action list");
                false
            }
            other => {
                self.reject("begin_action_execution", other);
                false
            }
        }
    }

    /// The action list completed successfully. Legal only from `ActionExecuting`.
    pub fn action_execution_succeeded(&self) {
        let mut inner = self.lock();
        if !self.is_executing(&inner, "action_execution_succeeded") {
            return;
        }
        inner.set(RuleStateKind::Running, RUNNING_REASON);
    }

    /// The action list failed, timed out or was cancelled.
    ///
    /// Goes back to `Running` exactly like success, so the rule retries on
    /// its next trigger; the failure is only visible through
    /// [`RuleStateSnapshot::action_failure_count`].
    pub fn action_execution_failed(&self) {
        let mut inner = self.lock();
        if !self.is_executing(&inner, "action_execution_failed") {
            return;
        }
        inner.action_failures += 1;
        inner.set(RuleStateKind::Running, RUNNING_REASON);
    }

    /// Report an execution whose executor went away without an outcome.
    ///
    /// When the rule is still `ActionExecuting` this records the cycle at
    /// `at` and fails it, in one step. Otherwise (the cycle was already
    /// reported, or a terminal transition took over) nothing happens.
    /// Returns whether the execution was abandoned here.
    pub fn abandon_action_execution(&self, at: DateTime<Utc>) -> bool {
        let mut inner = self.lock();
        if inner.state != RuleStateKind::ActionExecuting {
            return false;
        }
        inner.throttle.record(at);
        inner.action_failures += 1;
        inner.set(RuleStateKind::Running, RUNNING_REASON);
        true
    }

    /// Dispatch to succeeded/failed and hand `success` back to the caller.
    pub fn action_execution_completed(&self, success: bool) -> bool {
        if success {
            self.action_execution_succeeded();
        } else {
            self.action_execution_failed();
        }
        success
    }

    /// Append one completed action-list cycle (success or failure) to the
    /// window and to the lifetime history.
    pub fn record_execution(&self, at: DateTime<Utc>) {
        self.lock().throttle.record(at);
    }

    /// Completed cycles over the rule's lifetime.
    pub fn lifetime_occurrences(&self) -> usize {
        self.lock().throttle.lifetime_len()
    }

    // ── Throttling ───────────────────────────────────────────────

    /// Check whether the action list may run at `now`, updating state.
    ///
    /// This is not a pure read: it evicts window entries older than
    /// `now - window`, moves `Running` to `Throttled` when the limit is
    /// reached and `Throttled` back to `Running` once it is not. Use
    /// [`RuleStateSnapshot::is_throttled_at`] for a side-effect-free answer.
    ///
    /// Returns `true` when the rule is not throttled. A `Finished` or
    /// `ActionExecuting` rule keeps its state either way.
    pub fn check_and_update_throttle(&self, now: DateTime<Utc>) -> bool {
        let mut inner = self.lock();
        inner.throttle.evict(now);
        let throttled = inner.throttle.is_throttled();

        match (throttled, inner.state) {
            (true, RuleStateKind::Running) => {
                inner.set(RuleStateKind::Throttled, THROTTLED_REASON);
                info!(rule = %self.rule_name, "rule throttled by action count window");
            }
            (false, RuleStateKind::Throttled) => {
                inner.set(RuleStateKind::Running, RUNNING_REASON);
                info!(rule = %self.rule_name, "rule throttle lifted");
            }
            _ => {}
        }

        !throttled
    }

    // ── Terminal transitions ─────────────────────────────────────

    /// The startup trigger runs once; the rule is done after its first cycle.
    pub fn startup_trigger_completed(&self) {
        self.finish(FinishReason::StartupTriggerCompleted);
    }

    pub fn rule_duration_reached(&self) {
        self.finish(FinishReason::RuleDurationReached);
    }

    pub fn action_count_reached(&self) {
        self.finish(FinishReason::ActionCountReached);
    }

    pub fn rule_failure(&self, message: impl AsRef<str>) {
        self.finish(FinishReason::Failure(message.as_ref().to_string()));
    }

    /// Move to `Finished` from any state.
    ///
    /// Returns `false` (and changes nothing, reason included) when the rule
    /// had already finished.
    pub fn finish(&self, reason: FinishReason) -> bool {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            debug!(rule = %self.rule_name, ?reason, "rule already finished, ignoring");
            return false;
        }
        inner.set(RuleStateKind::Finished, reason.reason());
        info!(rule = %self.rule_name, ?reason, "rule finished");
        true
    }

    fn is_executing(&self, inner: &Inner, operation: &'static str) -> bool {
        match inner.state {
            RuleStateKind::ActionExecuting => true,
            RuleStateKind::Finished => false,
            other => {
                self.reject(operation, other);
                false
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reject(&self, operation: &'static str, current: RuleStateKind) {
        if cfg!(feature = "strict-transitions") || cfg!(all(debug_assertions, not(test))) {
            panic!(
                "illegal rule state transition: {} from {} (rule '{}')",
                operation, current, self.rule_name
            );
        }
        warn!(
            rule = %self.rule_name,
            operation,
            state = %current,
            "illegal rule state transition ignored"
        );
    }
}
