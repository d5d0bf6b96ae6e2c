//! Per-target registry of [`RuleState`] instances.
//!
//! Targets are spread over a fixed number of shards, each guarded by its own
//! `std::sync::RwLock`, so evaluating rules for one process never waits on
//! another process's connect or disconnect.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use sidecar_core::config::DEFAULT_REGISTRY_SHARDS;
use sidecar_core::TargetId;
use tracing::{debug, info};

use crate::loader::Result;
use crate::state::{RuleState, RuleStateConfig, RuleStateSnapshot};

type TargetRules = HashMap<String, Arc<RuleState>>;
type Shard = RwLock<HashMap<TargetId, TargetRules>>;

/// Sharded map of `(target, rule name) → RuleState`.
pub struct RuleStateRegistry {
    shards: Box<[Shard]>,
}

impl RuleStateRegistry {
    /// Create a registry with the default shard count.
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_REGISTRY_SHARDS)
    }

    /// Create a registry with `shards` shards (at least one).
    pub fn with_shards(shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| RwLock::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { shards }
    }

    /// Return the state for `(target, rule_name)`, creating it on first use.
    ///
    /// `factory` supplies the validated limits and only runs when no state
    /// exists yet. Insertion is atomic: concurrent callers for the same key
    /// all receive the same instance. A factory error is returned as-is and
    /// nothing is inserted.
    ///
    /// `factory` runs while the target's shard is write-locked. It must not
    /// call back into this registry: any target hashing to the same shard
    /// deadlocks.
    pub fn get_or_create<F>(
        &self,
        target: TargetId,
        rule_name: &str,
        factory: F,
    ) -> Result<Arc<RuleState>>
    where
        F: FnOnce() -> Result<RuleStateConfig>,
    {
        if let Some(existing) = self.get(target, rule_name) {
            return Ok(existing);
        }

        let mut shard = self.write_shard(target);
        let rules = shard.entry(target).or_default();
        if let Some(existing) = rules.get(rule_name) {
            // Lost the race between the read and the write lock.
            return Ok(Arc::clone(existing));
        }

        let config = match factory() {
            Ok(config) => config,
            Err(e) => {
                if rules.is_empty() {
                    shard.remove(&target);
                }
                return Err(e);
            }
        };

        let state = Arc::new(RuleState::new(rule_name, config));
        rules.insert(rule_name.to_string(), Arc::clone(&state));
        debug!(target_id = %target, rule = %rule_name, "created rule state");
        Ok(state)
    }

    pub fn get(&self, target: TargetId, rule_name: &str) -> Option<Arc<RuleState>> {
        self.read_shard(target)
            .get(&target)
            .and_then(|rules| rules.get(rule_name))
            .cloned()
    }

    /// Drop every rule state of a disconnected target.
    ///
    /// Returns how many were removed; zero when the target was unknown.
    pub fn remove_all_for_target(&self, target: TargetId) -> usize {
        let removed = self
            .write_shard(target)
            .remove(&target)
            .map(|rules| rules.len())
            .unwrap_or(0);
        if removed > 0 {
            info!(target_id = %target, removed, "removed rule states for disconnected target");
        }
        removed
    }

    /// Keep only the named rules for `target`, dropping states of rules that
    /// no longer exist after a configuration reload.
    ///
    /// Returns the names that were removed.
    pub fn retain_rules<'a, I>(&self, target: TargetId, rule_names: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let keep: HashSet<&str> = rule_names.into_iter().collect();
        let mut shard = self.write_shard(target);
        let Some(rules) = shard.get_mut(&target) else {
            return Vec::new();
        };

        let mut removed: Vec<String> = rules
            .keys()
            .filter(|name| !keep.contains(name.as_str()))
            .cloned()
            .collect();
        removed.sort();
        for name in &removed {
            rules.remove(name);
        }
        if rules.is_empty() {
            shard.remove(&target);
        }
        if !removed.is_empty() {
            info!(target_id = %target, removed = ?removed, "dropped rule states for removed rules");
        }
        removed
    }

    /// Snapshots of every rule state of `target`, sorted by rule name.
    ///
    /// Shard lock is released before any snapshot lock is taken.
    pub fn rules_for_target(&self, target: TargetId) -> Vec<RuleStateSnapshot> {
        let states: Vec<Arc<RuleState>> = self
            .read_shard(target)
            .get(&target)
            .map(|rules| rules.values().cloned().collect())
            .unwrap_or_default();

        let mut snapshots: Vec<RuleStateSnapshot> = states.iter().map(|s| s.snapshot()).collect();
        snapshots.sort_by(|a, b| a.rule_name.cmp(&b.rule_name));
        snapshots
    }

    pub fn targets(&self) -> Vec<TargetId> {
        let mut targets: Vec<TargetId> = self
            .shards
            .iter()
            .flat_map(|shard| {
                shard
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .keys()
                    .copied()
                    .collect::<Vec<_>>()
            })
            .collect();
        targets.sort();
        targets
    }

    pub fn target_count(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.read().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    /// Total number of rule states across all targets.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                shard
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .values()
                    .map(HashMap::len)
                    .sum::<usize>()
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn shard_index(&self, target: TargetId) -> usize {
        let mut hasher = DefaultHasher::new();
        target.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    fn read_shard(&self, target: TargetId) -> RwLockReadGuard<'_, HashMap<TargetId, TargetRules>> {
        self.shards[self.shard_index(target)]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_shard(&self, target: TargetId) -> RwLockWriteGuard<'_, HashMap<TargetId, TargetRules>> {
        self.shards[self.shard_index(target)]
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RuleStateRegistry {
    fn default() -> Self {
        Self::new()
    }
}
