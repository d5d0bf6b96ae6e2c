//! Filesystem event handler for the notify watcher (hot-reload).

use std::fs;
use std::sync::{Arc, PoisonError, RwLock};

use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{Event, EventKind};
use tracing::{info, warn};

use super::core::{is_dotfile, is_yaml, parse_rule, RuleSet};

/// Handle a single filesystem event from the notify watcher.
///
/// Returns `true` when the rule set changed.
pub(super) fn handle_fs_event(
    event: &Event,
    rule_set: &Arc<RwLock<RuleSet>>,
    default_action_count: u32,
) -> bool {
    let mut changed = false;

    for path in &event.paths {
        if !is_yaml(path) || is_dotfile(path) {
            continue;
        }

        match &event.kind {
            EventKind::Create(CreateKind::File)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Name(_)) => {
                // A rename away from this path shows up as Modify(Name) too.
                if !path.exists() {
                    changed |= remove(rule_set, path);
                    continue;
                }
                let contents = match fs::read_to_string(path) {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "failed to read file during hot-reload");
                        continue;
                    }
                };
                match parse_rule(&contents, default_action_count) {
                    Ok(rule) => {
                        info!(rule = %rule.name, path = %path.display(), "hot-reloaded rule");
                        rule_set
                            .write()
                            .unwrap_or_else(PoisonError::into_inner)
                            .upsert(path.clone(), rule);
                        changed = true;
                    }
                    Err(e) => {
                        warn!(
                            path = %path.display(),
                            error = %e,
                            "failed to parse rule during hot-reload, keeping previous version"
                        );
                    }
                }
            }
            EventKind::Remove(RemoveKind::File) => {
                changed |= remove(rule_set, path);
            }
            _ => {}
        }
    }

    changed
}

fn remove(rule_set: &Arc<RwLock<RuleSet>>, path: &std::path::Path) -> bool {
    let removed = rule_set
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .remove_path(path);
    match removed {
        Some(rule) => {
            info!(rule = %rule.name, path = %path.display(), "removed rule after file deletion");
            true
        }
        None => false,
    }
}
