//! Async driver that runs one collection rule against one target.
//!
//! Each cycle waits for the trigger, asks the rule state whether actions may
//! run, runs the action list and feeds the outcome back into the state.

pub mod builtin;
mod core;
mod traits;


pub use self::core::{PipelineExit, PipelineOptions, RulePipeline};
pub use self::traits::{ActionList, Trigger};
