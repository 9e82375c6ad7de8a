//! MySQL Backup Agent Library
//!
//! Full, incremental and binary-log backups through xtrabackup, with chain
//! resolution, prepare, restore, point-in-time recovery and retention.

pub mod catalog;
pub mod chain;
pub mod config;
pub mod executor;
pub mod fs;
pub mod notify;
pub mod orchestrator;
pub mod pitr;
pub mod prepare;
pub mod restore;
pub mod retention;
pub mod testing;
pub mod tool;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::{OrchestratorError, Result};
