use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_usize(profile: &str, key: &str, default: usize) -> usize {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub rules: RulesConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `SIDECAR_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("SIDECAR_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            rules: RulesConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  rules:       dir={}", self.rules.rules_dir.display());
        tracing::info!(
            "  registry:    shards={}, default_action_count={}",
            self.rules.registry_shards,
            self.rules.default_action_count
        );
        tracing::info!(
            "  actions:     timeout={}",
            self.rules
                .action_timeout_secs
                .map(|s| format!("{}s", s))
                .unwrap_or_else(|| "(none)".to_string())
        );
    }
}

// ── Collection rules ─────────────────────────────────────────

/// Number of registry shards when `REGISTRY_SHARDS` is unset or invalid.
pub const DEFAULT_REGISTRY_SHARDS: usize = 16;

/// Action count limit applied to rules whose `limits.actionCount` is absent.
pub const DEFAULT_ACTION_COUNT: u32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Directory scanned for collection rule YAML files.
    pub rules_dir: PathBuf,
    /// Shard count of the per-target rule state registry.
    pub registry_shards: usize,
    /// Fallback action count limit for rules that do not set one.
    pub default_action_count: u32,
    /// Upper bound on a single action-list run; `None` means unbounded.
    pub action_timeout_secs: Option<u64>,
}

impl RulesConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            rules_dir: PathBuf::from(profiled_env_or(p, "RULES_DIR", "data/rules")),
            registry_shards: profiled_env_usize(p, "REGISTRY_SHARDS", DEFAULT_REGISTRY_SHARDS)
                .max(1),
            default_action_count: profiled_env_u32(p, "DEFAULT_ACTION_COUNT", DEFAULT_ACTION_COUNT),
            action_timeout_secs: profiled_env_opt(p, "ACTION_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok()),
        }
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            rules_dir: PathBuf::from("data/rules"),
            registry_shards: DEFAULT_REGISTRY_SHARDS,
            default_action_count: DEFAULT_ACTION_COUNT,
            action_timeout_secs: None,
        }
    }
}
