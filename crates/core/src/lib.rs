pub mod config;
pub mod error;
pub mod target;

pub use config::Config;
pub use error::*;
pub use target::TargetId;
