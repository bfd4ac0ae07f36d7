// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Events broadcast by the agent pool.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::loop_state::LoopEndReason;
use super::types::{AgentStatus, CompletionReport};
use crate::types::TokenUsage;

/// Event published to every pool subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PoolEvent {
    /// The pool accepted `spawn_main`.
    Ready { brave_mode: bool },
    StatusChanged {
        agent_id: String,
        status: AgentStatus,
    },
    Text {
        agent_id: String,
        delta: String,
        accumulated: String,
    },
    ToolUse {
        agent_id: String,
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        agent_id: String,
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
    Complete {
        agent_id: String,
        result: String,
        usage: TokenUsage,
        #[serde(skip_serializing_if = "Option::is_none")]
        cost_usd: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        /// The agent flagged its own result as an error.
        is_error: bool,
    },
    Error {
        agent_id: String,
        error_type: String,
        message: String,
    },
    PromiseDetected { agent_id: String, pattern: String },
    /// A sub-agent finished its task.
    AgentReport {
        agent_id: String,
        report: CompletionReport,
    },
    AgentTerminated { agent_id: String },
    /// Another agent already holds a file this agent tried to edit.
    LockConflict {
        agent_id: String,
        path: String,
        holder: Option<String>,
    },
    LoopIteration { iteration: u32, max_iterations: u32 },
    LoopComplete {
        reason: LoopEndReason,
        iterations: u32,
        max_iterations: u32,
    },
    ResourceUsage {
        agent_id: String,
        cpu_percent: f32,
        memory_mb: f64,
    },
}

impl PoolEvent {
    /// Agent the event concerns, if any.
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Self::StatusChanged { agent_id, .. }
            | Self::Text { agent_id, .. }
            | Self::ToolUse { agent_id, .. }
            | Self::ToolResult { agent_id, .. }
            | Self::Complete { agent_id, .. }
            | Self::Error { agent_id, .. }
            | Self::PromiseDetected { agent_id, .. }
            | Self::AgentReport { agent_id, .. }
            | Self::AgentTerminated { agent_id }
            | Self::LockConflict { agent_id, .. }
            | Self::ResourceUsage { agent_id, .. } => Some(agent_id),
            Self::Ready { .. } | Self::LoopIteration { .. } | Self::LoopComplete { .. } => None,
        }
    }
}
