//! Core [`RuleLoader`] struct: filesystem-backed rule loading with optional hot-reload.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{info, warn};

use crate::schema::CollectionRule;

use super::error::{LoadResult, LoadStatus, Result};
use super::watcher::handle_fs_event;

/// Loaded rules keyed by name, plus the file each one came from.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: HashMap<String, CollectionRule>,
    sources: HashMap<PathBuf, String>,
}

impl RuleSet {
    /// Insert or replace a rule and remember its source file.
    ///
    /// A file that used to define a different rule name drops that rule.
    pub(super) fn upsert(&mut self, path: PathBuf, rule: CollectionRule) {
        if let Some(previous) = self.sources.insert(path.clone(), rule.name.clone()) {
            if previous != rule.name {
                self.rules.remove(&previous);
            }
        }
        if let Some(other) = self
            .sources
            .iter()
            .find(|(p, name)| **name == rule.name && **p != path)
            .map(|(p, _)| p.clone())
        {
            warn!(
                rule = %rule.name,
                path = %path.display(),
                shadowed = %other.display(),
                "duplicate rule name, latest file wins"
            );
            self.sources.remove(&other);
        }
        self.rules.insert(rule.name.clone(), rule);
    }

    /// Remove whatever rule `path` defined.
    pub(super) fn remove_path(&mut self, path: &Path) -> Option<CollectionRule> {
        let name = self.sources.remove(path)?;
        self.rules.remove(&name)
    }

    pub fn get(&self, name: &str) -> Option<&CollectionRule> {
        self.rules.get(name)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// All rules sorted by name.
    pub fn sorted(&self) -> Vec<CollectionRule> {
        let mut rules: Vec<CollectionRule> = self.rules.values().cloned().collect();
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        rules
    }
}

/// Filesystem-backed rule loader with optional hot-reload.
///
/// Scans a directory (recursively) for `*.yml` / `*.yaml` files, each holding
/// one [`CollectionRule`], validates them and keeps them in memory keyed by
/// rule name.
pub struct RuleLoader {
    /// Root directory containing rule YAML files.
    rules_dir: PathBuf,
    /// Action count applied to rules without `limits.actionCount`.
    default_action_count: u32,
    rule_set: Arc<RwLock<RuleSet>>,
    /// Bumped on every change to `rule_set`.
    generation: Arc<AtomicU64>,
    /// Active filesystem watcher (held to keep it alive).
    _watcher: Option<RecommendedWatcher>,
}

impl RuleLoader {
    /// Create a new loader for the given directory.
    ///
    /// Creates the directory (and parents) if it does not exist.
    pub fn new(rules_dir: PathBuf, default_action_count: u32) -> Self {
        if !rules_dir.exists() {
            if let Err(e) = fs::create_dir_all(&rules_dir) {
                warn!(path = %rules_dir.display(), error = %e, "failed to create rules directory");
            }
        }
        Self {
            rules_dir,
            default_action_count,
            rule_set: Arc::new(RwLock::new(RuleSet::default())),
            generation: Arc::new(AtomicU64::new(0)),
            _watcher: None,
        }
    }

    /// Recursively scan the rules directory and load all YAML files.
    ///
    /// Dotfiles and non-YAML files are skipped. Parse and validation errors
    /// are reported per-file but do not abort the scan.
    pub fn load_all(&self) -> Result<Vec<LoadResult>> {
        let mut results = Vec::new();
        self.scan_dir_recursive(&self.rules_dir, &mut results)?;
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(results)
    }

    fn scan_dir_recursive(&self, dir: &Path, results: &mut Vec<LoadResult>) -> Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "failed to read directory");
                return Ok(());
            }
        };

        for entry in entries {
            let entry = entry?;
            let path = entry.path();

            if is_dotfile(&path) {
                if path.is_file() {
                    results.push(LoadResult {
                        path,
                        status: LoadStatus::Skipped {
                            reason: "dotfile".to_string(),
                        },
                    });
                }
                continue;
            }

            if path.is_dir() {
                self.scan_dir_recursive(&path, results)?;
                continue;
            }

            if !is_yaml(&path) {
                results.push(LoadResult {
                    path,
                    status: LoadStatus::Skipped {
                        reason: "not a YAML file".to_string(),
                    },
                });
                continue;
            }

            match self.load_file(&path) {
                Ok(rule) => {
                    let rule_name = rule.name.clone();
                    info!(rule = %rule_name, trigger = %rule.trigger.kind, path = %path.display(), "loaded rule");
                    self.write_set().upsert(path.clone(), rule);
                    results.push(LoadResult {
                        path,
                        status: LoadStatus::Loaded { rule_name },
                    });
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load rule file");
                    results.push(LoadResult {
                        path,
                        status: LoadStatus::Failed {
                            error: e.to_string(),
                        },
                    });
                }
            }
        }

        Ok(())
    }

    /// Parse and validate a single rule file.
    pub fn load_file(&self, path: &Path) -> Result<CollectionRule> {
        let contents = fs::read_to_string(path)?;
        parse_rule(&contents, self.default_action_count)
    }

    /// Start a filesystem watcher with 500ms poll interval.
    ///
    /// On file create/modify the rule is re-parsed and upserted.
    /// On file delete the rule is removed from the in-memory set.
    /// Parse errors are logged as warnings; the previous version is kept.
    pub fn watch(&mut self) -> Result<()> {
        let rule_set = Arc::clone(&self.rule_set);
        let generation = Arc::clone(&self.generation);
        let default_action_count = self.default_action_count;

        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if handle_fs_event(&event, &rule_set, default_action_count) {
                        generation.fetch_add(1, Ordering::SeqCst);
                    }
                }
                Err(e) => warn!(error = %e, "filesystem watcher error"),
            },
        )?;

        watcher.watch(&self.rules_dir, RecursiveMode::Recursive)?;

        let _ = watcher.configure(notify::Config::default().with_poll_interval(Duration::from_millis(500)));

        info!(path = %self.rules_dir.display(), "watching rules directory for changes (recursive)");
        self._watcher = Some(watcher);
        Ok(())
    }

    /// Get the rules directory path.
    pub fn rules_dir(&self) -> &Path {
        &self.rules_dir
    }

    /// Get the shared rule set.
    pub fn rule_set(&self) -> Arc<RwLock<RuleSet>> {
        Arc::clone(&self.rule_set)
    }

    /// All loaded rules sorted by name, enabled or not.
    pub fn rules(&self) -> Vec<CollectionRule> {
        self.rule_set
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sorted()
    }

    /// Enabled rules sorted by name.
    pub fn active_rules(&self) -> Vec<CollectionRule> {
        self.rules().into_iter().filter(|r| r.enabled).collect()
    }

    /// Counter that changes whenever the loaded rule set changes.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn write_set(&self) -> std::sync::RwLockWriteGuard<'_, RuleSet> {
        self.rule_set.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Deserialize and validate one rule document.
pub(super) fn parse_rule(contents: &str, default_action_count: u32) -> Result<CollectionRule> {
    let rule: CollectionRule = serde_yaml::from_str(contents)?;
    rule.validate(default_action_count)?;
    Ok(rule)
}

pub(super) fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e == "yml" || e == "yaml")
        .unwrap_or(false)
}

pub(super) fn is_dotfile(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}
