//! [`RulePipeline`]: drives one rule on one target through its state machine.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sidecar_core::TargetId;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::state::RuleState;

use super::traits::{ActionList, Trigger};

/// Per-rule knobs that are not part of the rule's limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineOptions {
    /// The trigger fires once; the rule finishes after its first cycle.
    pub startup: bool,
    /// Upper bound on one action-list run. Exceeding it counts as a failure.
    pub action_timeout: Option<Duration>,
}

/// Why [`RulePipeline::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineExit {
    /// The rule reached `Finished`.
    Finished,
    /// Shutdown was requested. The rule is not finished; an action list cut
    /// short by the shutdown is reported as a failed cycle.
    Cancelled,
}

/// Sequences trigger, throttle check and action list for a single rule.
///
/// The pipeline is the only caller of the state's execution transitions, so
/// the throttle check and `begin_action_execution` never interleave with
/// another cycle of the same rule. It also plays the watchdog: rule
/// duration, lifetime action count and startup-once semantics all end here.
pub struct RulePipeline {
    target: TargetId,
    state: Arc<RuleState>,
    trigger: Arc<dyn Trigger>,
    actions: Arc<dyn ActionList>,
    options: PipelineOptions,
    started_at: DateTime<Utc>,
}

impl RulePipeline {
    pub fn new(
        target: TargetId,
        state: Arc<RuleState>,
        trigger: Arc<dyn Trigger>,
        actions: Arc<dyn ActionList>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            target,
            state,
            trigger,
            actions,
            options,
            started_at: Utc::now(),
        }
    }

    pub fn state(&self) -> &Arc<RuleState> {
        &self.state
    }

    /// When the pipeline was created; the rule duration counts from here.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Run until the rule finishes or `shutdown` flips to `true`.
    ///
    /// When the rule duration elapses or shutdown arrives mid-execution, the
    /// action list future is dropped and the cycle is reported as failed
    /// before the rule finishes or the pipeline returns.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> PipelineExit {
        let deadline = self.state.config().rule_duration.map(|d| Instant::now() + d);

        tokio::select! {
            exit = self.run_cycles() => exit,
            _ = sleep_until(deadline) => {
                info!(target_id = %self.target, rule = %self.state.rule_name(), "rule duration elapsed");
                self.state.rule_duration_reached();
                PipelineExit::Finished
            }
            _ = wait_for_shutdown(&mut shutdown) => {
                debug!(target_id = %self.target, rule = %self.state.rule_name(), "rule pipeline cancelled");
                PipelineExit::Cancelled
            }
        }
    }

    async fn run_cycles(&self) -> PipelineExit {
        loop {
            if self.state.is_finished() {
                return PipelineExit::Finished;
            }
            if self.lifetime_limit_reached() {
                self.state.action_count_reached();
                return PipelineExit::Finished;
            }

            if let Err(e) = self.trigger.wait().await {
                warn!(
                    target_id = %self.target,
                    rule = %self.state.rule_name(),
                    error = %e,
                    "trigger failed"
                );
                self.state.rule_failure(e.to_string());
                return PipelineExit::Finished;
            }

            if !self.state.check_and_update_throttle(Utc::now()) {
                debug!(
                    target_id = %self.target,
                    rule = %self.state.rule_name(),
                    "trigger satisfied while throttled, skipping action list"
                );
                continue;
            }

            self.execute_actions().await;

            if self.options.startup {
                self.state.startup_trigger_completed();
                return PipelineExit::Finished;
            }
        }
    }

    /// One action-list cycle. Returns whether it ran and succeeded.
    ///
    /// Skips the action list when the state refuses to begin, e.g. because
    /// a terminal transition landed after the throttle check.
    pub(super) async fn execute_actions(&self) -> bool {
        if !self.state.begin_action_execution() {
            debug!(
                target_id = %self.target,
                rule = %self.state.rule_name(),
                "action list not started"
            );
            return false;
        }
        let mut guard = ExecutionGuard {
            state: &self.state,
            armed: true,
        };
        info!(target_id = %self.target, rule = %self.state.rule_name(), "executing action list");

        let outcome = match self.options.action_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.actions.execute(self.target)).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!("action list timed out after {:?}", limit)),
            },
            None => self.actions.execute(self.target).await,
        };
        guard.armed = false;

        self.state.record_execution(Utc::now());

        let success = match outcome {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    target_id = %self.target,
                    rule = %self.state.rule_name(),
                    error = %e,
                    "action list failed"
                );
                false
            }
        };
        self.state.action_execution_completed(success)
    }

    /// Without a sliding window the action count is a lifetime cap.
    fn lifetime_limit_reached(&self) -> bool {
        let config = self.state.config();
        !config.has_sliding_window()
            && self.state.lifetime_occurrences() >= config.action_count_limit as usize
    }
}

/// Fails the current cycle if the action-list future is dropped before it
/// reports back.
struct ExecutionGuard<'a> {
    state: &'a RuleState,
    armed: bool,
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        if self.armed && self.state.abandon_action_execution(Utc::now()) {
            warn!(rule = %self.state.rule_name(), "action list cancelled, counted as failure");
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Resolve once `shutdown` reads `true`; never if the sender is gone.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
