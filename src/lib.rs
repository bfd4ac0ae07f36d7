// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Workforce - orchestrate a pool of coding-agent subprocesses.
//!
//! Each agent is a non-interactive CLI invocation run inside a pseudo-terminal.
//! Its newline-delimited JSON output is decoded into semantic events, file
//! edits are coordinated through advisory per-file locks, and the main agent
//! can be driven in a loop until it prints a completion promise.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`types`] - Shared value types (history entries, token usage)
//! - [`error`] - Error types and result aliases
//! - [`config`] - Configuration loading and merging
//! - [`orchestrate`] - Agent pool, stream parser, file locks, loop automation
//! - [`models`] - Stale-while-revalidate cache of available model names
//! - [`telemetry`] - Tracing subscriber setup
//!
//! # Example
//!
//! ```rust,ignore
//! use workforce::config::{load_config, CliOptions};
//! use workforce::orchestrate::AgentPool;
//!
//! let root = std::env::current_dir()?;
//! let config = load_config(&root, CliOptions::default())?;
//! let pool = AgentPool::new(config.cli_config(&root), config.pool_options());
//! pool.spawn_main(config.brave_mode, Some("Fix the failing test".into())).await?;
//! ```

pub mod config;
pub mod error;
pub mod models;
pub mod orchestrate;
pub mod telemetry;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{ConfigError, ModelCacheError, Result, SpawnError};
pub use models::{ModelCache, ModelInfo};
pub use orchestrate::{
    AgentPool, AgentStatus, CliConfig, Persona, PoolError, PoolEvent, PoolOptions, StreamParser,
    WorkforceLocks,
};
pub use types::{HistoryEntry, Role, TokenUsage};

/// Workforce version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_public_exports() {
        let entry = HistoryEntry::user("test");
        assert_eq!(entry.role, Role::User);
        assert_eq!(AgentStatus::Idle.as_str(), "idle");
        assert!(StreamParser::new().accumulated_text().is_empty());
    }
}
