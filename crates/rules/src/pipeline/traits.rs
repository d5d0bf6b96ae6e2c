//! Collaborator seams of the rule pipeline.

use async_trait::async_trait;
use sidecar_core::TargetId;

/// Detects a rule's triggering condition.
///
/// How a condition is observed (event counters, startup, ...) lives behind
/// this trait. The pipeline only needs to know when it fired.
#[async_trait]
pub trait Trigger: Send + Sync {
    /// Wait until the condition is satisfied.
    ///
    /// An error means the trigger can no longer observe its target and
    /// finishes the rule with that message.
    async fn wait(&self) -> anyhow::Result<()>;
}

/// Runs a rule's action list against a target.
#[async_trait]
pub trait ActionList: Send + Sync {
    /// Execute every action in order. Any error fails the whole cycle.
    async fn execute(&self, target: TargetId) -> anyhow::Result<()>;
}
