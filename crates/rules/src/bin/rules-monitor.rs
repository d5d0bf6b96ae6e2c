//! rules-monitor: runs collection rules against a simulated target.
//!
//! Loads every rule from the rules directory, drives each through its
//! pipeline with timer-based triggers and logging actions, and periodically
//! logs the rule descriptions as JSON. Rule files are hot-reloaded: removed
//! or edited rules restart with fresh state, untouched rules keep theirs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::Parser;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use sidecar_core::config::{load_dotenv, Config};
use sidecar_core::TargetId;
use sidecar_rules::describe::describe;
use sidecar_rules::loader::{LoadStatus, RuleLoader};
use sidecar_rules::pipeline::{builtin, PipelineExit, PipelineOptions, RulePipeline};
use sidecar_rules::registry::RuleStateRegistry;
use sidecar_rules::schema::CollectionRule;

// ── CLI ─────────────────────────────────────────────────────────────

/// Collection rule monitor: rule state machines against a simulated target.
#[derive(Parser, Debug)]
#[command(name = "rules-monitor", version, about)]
struct Cli {
    /// Rules directory; overrides RULES_DIR from the environment config.
    #[arg(long)]
    rules_dir: Option<PathBuf>,

    /// Seconds between status reports.
    #[arg(long, env = "RULES_REPORT_INTERVAL", default_value_t = 10)]
    report_interval: u64,

    /// Seconds between firings of non-startup triggers without an `interval` setting.
    #[arg(long, env = "RULES_TRIGGER_INTERVAL", default_value_t = 5)]
    trigger_interval: u64,
}

// ── Monitor ─────────────────────────────────────────────────────────

struct RunningRule {
    rule: CollectionRule,
    started_at: DateTime<Utc>,
    handle: JoinHandle<PipelineExit>,
}

struct Monitor {
    target: TargetId,
    registry: Arc<RuleStateRegistry>,
    default_action_count: u32,
    action_timeout: Option<Duration>,
    trigger_period: Duration,
    shutdown: watch::Receiver<bool>,
    running: HashMap<String, RunningRule>,
}

impl Monitor {
    /// Bring running pipelines in line with the currently active rules.
    fn sync(&mut self, active: Vec<CollectionRule>) {
        let unchanged: Vec<String> = active
            .iter()
            .filter(|rule| {
                self.running
                    .get(&rule.name)
                    .is_some_and(|running| running.rule == **rule)
            })
            .map(|rule| rule.name.clone())
            .collect();

        self.running.retain(|name, running| {
            let keep = unchanged.contains(name);
            if !keep {
                running.handle.abort();
            }
            keep
        });
        self.registry
            .retain_rules(self.target, unchanged.iter().map(String::as_str));

        for rule in active {
            if !self.running.contains_key(&rule.name) {
                self.start(rule);
            }
        }
    }

    fn start(&mut self, rule: CollectionRule) {
        let default_action_count = self.default_action_count;
        let state = match self.registry.get_or_create(self.target, &rule.name, || {
            rule.limits.to_state_config(default_action_count)
        }) {
            Ok(state) => state,
            Err(e) => {
                error!(rule = %rule.name, error = %e, "cannot create rule state");
                return;
            }
        };

        let (trigger, actions) = builtin::for_rule(&rule, self.trigger_period);
        let options = PipelineOptions {
            startup: rule.is_startup(),
            action_timeout: self.action_timeout,
        };
        let pipeline = RulePipeline::new(self.target, state, trigger, actions, options);
        let started_at = pipeline.started_at();
        let shutdown = self.shutdown.clone();
        let name = rule.name.clone();
        let handle = tokio::spawn(async move {
            let exit = pipeline.run(shutdown).await;
            let state = pipeline.state();
            info!(
                rule = %state.rule_name(),
                ?exit,
                reason = %state.state_reason(),
                "rule pipeline exited"
            );
            exit
        });

        info!(rule = %name, "rule started");
        self.running.insert(
            name,
            RunningRule {
                rule,
                started_at,
                handle,
            },
        );
    }

    fn report(&self) {
        let now = Utc::now();
        for snapshot in self.registry.rules_for_target(self.target) {
            let started_at = self
                .running
                .get(&snapshot.rule_name)
                .map(|running| running.started_at);
            let description = describe(&snapshot, now, started_at);
            match serde_json::to_string(&description) {
                Ok(json) => info!(rule = %snapshot.rule_name, description = %json, "rule status"),
                Err(e) => warn!(rule = %snapshot.rule_name, error = %e, "failed to serialize rule status"),
            }
        }
    }

    async fn stop(self) {
        for (name, running) in self.running {
            if let Err(e) = running.handle.await {
                if !e.is_cancelled() {
                    warn!(rule = %name, error = %e, "rule pipeline task failed");
                }
            }
        }
        self.registry.remove_all_for_target(self.target);
    }
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();
    let config = Config::from_env();
    config.log_summary();

    let rules_dir = cli.rules_dir.unwrap_or_else(|| config.rules.rules_dir.clone());
    let mut loader = RuleLoader::new(rules_dir, config.rules.default_action_count);
    for result in loader.load_all()? {
        match result.status {
            LoadStatus::Loaded { rule_name } => {
                info!(path = %result.path.display(), rule = %rule_name, "loaded rule")
            }
            LoadStatus::Skipped { reason } => {
                info!(path = %result.path.display(), reason = %reason, "skipped file")
            }
            LoadStatus::Failed { error } => {
                warn!(path = %result.path.display(), error = %error, "failed to load rule")
            }
        }
    }
    loader.watch()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let target = TargetId::new();
    info!(target_id = %target, "monitoring simulated target");

    let mut monitor = Monitor {
        target,
        registry: Arc::new(RuleStateRegistry::with_shards(config.rules.registry_shards)),
        default_action_count: config.rules.default_action_count,
        action_timeout: config.rules.action_timeout_secs.map(Duration::from_secs),
        trigger_period: Duration::from_secs(cli.trigger_interval.max(1)),
        shutdown: shutdown_rx,
        running: HashMap::new(),
    };
    monitor.sync(loader.active_rules());
    let mut seen_generation = loader.generation();

    let mut report = tokio::time::interval(Duration::from_secs(cli.report_interval.max(1)));
    let mut reload = tokio::time::interval(Duration::from_secs(1));

    info!("rules-monitor starting");
    loop {
        tokio::select! {
            _ = report.tick() => monitor.report(),
            _ = reload.tick() => {
                let generation = loader.generation();
                if generation != seen_generation {
                    seen_generation = generation;
                    info!(generation, "rule files changed, reloading");
                    monitor.sync(loader.active_rules());
                }
            }
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    error!(error = %e, "failed to listen for ctrl-c");
                }
                break;
            }
        }
    }

    info!("shutting down");
    let _ = shutdown_tx.send(true);
    monitor.stop().await;
    info!("rules-monitor exited cleanly");
    Ok(())
}
