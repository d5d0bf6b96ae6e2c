//! Stand-in trigger and action implementations used by `rules-monitor`.
//!
//! Real triggers observe a target's diagnostics stream. These fire on a timer
//! so rule limits can be watched working end to end without one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sidecar_core::TargetId;
use tokio::sync::Mutex;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::info;

use crate::duration::parse_duration;
use crate::schema::CollectionRule;

use super::traits::{ActionList, Trigger};

/// Fires once, immediately; every later wait pends forever.
#[derive(Debug, Default)]
pub struct StartupTrigger {
    fired: AtomicBool,
}

#[async_trait]
impl Trigger for StartupTrigger {
    async fn wait(&self) -> anyhow::Result<()> {
        if self.fired.swap(true, Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

/// Fires every `period`, starting one period after creation.
#[derive(Debug)]
pub struct IntervalTrigger {
    interval: Mutex<Interval>,
}

impl IntervalTrigger {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval: Mutex::new(interval),
        }
    }
}

#[async_trait]
impl Trigger for IntervalTrigger {
    async fn wait(&self) -> anyhow::Result<()> {
        self.interval.lock().await.tick().await;
        Ok(())
    }
}

/// Logs each configured action instead of running it.
#[derive(Debug, Clone)]
pub struct LogActionList {
    rule_name: String,
    actions: Vec<String>,
}

impl LogActionList {
    pub fn new(rule_name: impl Into<String>, actions: Vec<String>) -> Self {
        Self {
            rule_name: rule_name.into(),
            actions,
        }
    }
}

#[async_trait]
impl ActionList for LogActionList {
    async fn execute(&self, target: TargetId) -> anyhow::Result<()> {
        for (index, action) in self.actions.iter().enumerate() {
            info!(
                target_id = %target,
                rule = %self.rule_name,
                index,
                action = %action,
                "action executed"
            );
        }
        Ok(())
    }
}

/// Trigger and action list for `rule`.
///
/// `Startup` rules get a [`StartupTrigger`]. Every other trigger type fires
/// on an interval taken from its `interval` setting, else `default_period`.
pub fn for_rule(
    rule: &CollectionRule,
    default_period: Duration,
) -> (Arc<dyn Trigger>, Arc<dyn ActionList>) {
    let trigger: Arc<dyn Trigger> = if rule.is_startup() {
        Arc::new(StartupTrigger::default())
    } else {
        Arc::new(IntervalTrigger::new(trigger_period(rule).unwrap_or(default_period)))
    };
    let actions = rule.actions.iter().map(|a| a.kind.clone()).collect();
    (trigger, Arc::new(LogActionList::new(&rule.name, actions)))
}

fn trigger_period(rule: &CollectionRule) -> Option<Duration> {
    let raw = rule.trigger.settings.as_ref()?.get("interval")?;
    let period = match raw {
        serde_yaml::Value::String(s) => parse_duration(s)?,
        serde_yaml::Value::Number(n) => Duration::from_secs(n.as_u64()?),
        _ => return None,
    };
    (!period.is_zero()).then_some(period)
}
