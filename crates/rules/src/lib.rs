//! Collection rule engine for the diagnostics sidecar.
//!
//! This crate provides:
//! - The per-rule execution state machine with sliding-window throttling
//! - A sharded registry of rule states keyed by target and rule name
//! - Read-only status projection into the rule description wire format
//! - YAML rule definitions with a hot-reloading filesystem loader
//! - An async pipeline driving trigger, throttle and action list per rule

pub mod describe;
pub mod duration;
pub mod loader;
pub mod pipeline;
pub mod registry;
pub mod schema;
pub mod state;

pub use loader::{Result, RuleError};
