//! Filesystem rule loader with hot-reload via `notify` watcher.
//!
//! Watches the rules directory for YAML file changes (create, modify, delete)
//! and reloads affected collection rules into the in-memory rule set. Every
//! change bumps a generation counter so consumers can re-sync their rule
//! states without being called back.

mod core;
mod error;
mod watcher;


pub use self::core::{RuleLoader, RuleSet};
pub use self::error::{LoadResult, LoadStatus, Result, RuleError};
