// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Agent process orchestration.
//!
//! This module drives a pool of coding-agent subprocesses against one
//! project.
//!
//! # Architecture
//!
//! - **AgentPool**: owns one record per live agent (the reserved `main` agent
//!   plus spawned sub-agents), launches a fresh pseudo-terminal subprocess for
//!   every message, and broadcasts typed [`PoolEvent`]s.
//!
//! - **StreamParser**: turns arbitrarily-chunked subprocess output into
//!   semantic events (text, tool use, tool result, error, completion).
//!
//! - **WorkforceLocks**: advisory per-file write ownership shared between
//!   agents through a JSON document in the project.
//!
//! - **Loop automation**: re-sends a prompt to the main agent until a
//!   completion promise appears in its output.
//!
//! # Conversation continuity
//!
//! Agents are not long-lived sessions. Each message is a new process
//! invocation; every message after an agent's first carries `--continue`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use workforce::orchestrate::{AgentPool, CliConfig, Persona, PoolOptions};
//!
//! let pool = AgentPool::new(CliConfig::new("claude", "."), PoolOptions::default());
//! let mut events = pool.subscribe();
//!
//! pool.spawn_main(false, Some("Summarize the README".to_string())).await?;
//! let helper = pool.spawn_agent(Persona::new("tester"), "write tests", None).await?;
//!
//! while let Ok(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! ```

pub mod events;
pub mod invocation;
pub mod locks;
pub mod loop_state;
pub mod monitor;
pub mod parser;
pub mod pool;
pub mod shell_env;
pub mod spawner;
pub mod types;

// Re-export main types for convenience
pub use events::PoolEvent;
pub use invocation::{derive_model, CliConfig, InvocationParams, ModelSelection, DEFAULT_EXECUTABLE};
pub use locks::{LockDocument, LockStatus, WorkforceLocks};
pub use loop_state::{LoopConfig, LoopEndReason, LoopStatus};
pub use monitor::{PsProbe, ResourceProbe, ResourceSample};
pub use parser::{ParserEvent, StreamParser};
pub use pool::{AgentPool, AgentPoolBuilder, PoolError, PoolOptions};
pub use shell_env::{resolve_executable, resolve_shell_path};
pub use spawner::{
    ProcessKiller, ProcessOutput, ProcessSpawner, PtySpawner, SpawnRequest, SpawnedProcess,
};
pub use types::{
    AgentContext, AgentProcess, AgentSnapshot, AgentStatus, CompletionReport, Persona,
    MAIN_AGENT_ID,
};
