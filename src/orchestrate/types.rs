// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core types for the agent process pool.

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use super::spawner::ProcessKiller;
use crate::types::{HistoryEntry, TokenUsage};

/// Reserved id of the main agent.
pub const MAIN_AGENT_ID: &str = "main";

/// Tools whose input names a file the agent is about to change.
pub const FILE_EDIT_TOOLS: &[&str] = &["Write", "Edit", "MultiEdit", "NotebookEdit"];

/// Input keys that carry the edited path.
const FILE_PATH_KEYS: &[&str] = &["file_path", "notebook_path"];

/// Path edited by a tool invocation, if it is a file-editing tool.
pub fn edited_path<'a>(tool_name: &str, input: &'a serde_json::Value) -> Option<&'a str> {
    if !FILE_EDIT_TOOLS.contains(&tool_name) {
        return None;
    }
    FILE_PATH_KEYS
        .iter()
        .find_map(|key| input.get(*key).and_then(|v| v.as_str()))
        .filter(|p| !p.is_empty())
}

// ============================================================================
// Agent Status
// ============================================================================

/// Lifecycle status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Active,
    Complete,
    Error,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    /// Whether a subprocess is expected to be running.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Persona
// ============================================================================

/// Model and tool settings for one agent.
///
/// Unset fields fall back to the pool's [`CliConfig`](super::CliConfig).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    #[serde(default)]
    pub disallowed_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_budget_usd: Option<f64>,
}

impl Persona {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = tools;
        self
    }

    pub fn with_disallowed_tools(mut self, tools: Vec<String>) -> Self {
        self.disallowed_tools = tools;
        self
    }

    pub fn with_max_budget(mut self, usd: f64) -> Self {
        self.max_budget_usd = Some(usd);
        self
    }
}

// ============================================================================
// Agent Records
// ============================================================================

/// Where an agent works and what it holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentContext {
    pub working_dir: PathBuf,
    /// Snapshot; the lock coordinator holds the authoritative copy.
    pub locked_files: Vec<String>,
}

/// Summary emitted when a sub-agent finishes its task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionReport {
    pub result: String,
    pub usage: TokenUsage,
    pub files_modified: Vec<String>,
    pub duration_ms: u64,
}

/// Live record for one agent.
#[derive(Debug)]
pub struct AgentProcess {
    pub id: String,
    pub persona: Persona,
    pub status: AgentStatus,
    pub task: String,
    pub start_time: DateTime<Utc>,
    pub pid: Option<u32>,
    pub message_history: Vec<HistoryEntry>,
    pub context: AgentContext,
    pub completion_report: Option<CompletionReport>,
    /// Runs with permission checks skipped.
    pub brave: bool,
    /// Usage summed over every completed message.
    pub usage: TokenUsage,
    pub files_modified: BTreeSet<String>,
    /// Incremented for every subprocess; output from older runs is ignored.
    pub run_id: u64,
    pub(crate) killer: Option<Box<dyn ProcessKiller>>,
    pub(crate) monitor: Option<JoinHandle<()>>,
}

impl AgentProcess {
    pub fn new(
        id: impl Into<String>,
        persona: Persona,
        task: impl Into<String>,
        working_dir: PathBuf,
    ) -> Self {
        Self {
            id: id.into(),
            persona,
            status: AgentStatus::Idle,
            task: task.into(),
            start_time: Utc::now(),
            pid: None,
            message_history: Vec::new(),
            context: AgentContext {
                working_dir,
                locked_files: Vec::new(),
            },
            completion_report: None,
            brave: false,
            usage: TokenUsage::default(),
            files_modified: BTreeSet::new(),
            run_id: 0,
            killer: None,
            monitor: None,
        }
    }

    pub fn with_brave(mut self, brave: bool) -> Self {
        self.brave = brave;
        self
    }

    /// The next message is the first one this record sends.
    pub fn is_first_message(&self) -> bool {
        self.message_history.is_empty()
    }

    /// Kill the live subprocess, if any.
    pub(crate) fn kill_process(&mut self) -> Option<std::io::Error> {
        self.pid = None;
        self.killer.take().and_then(|mut killer| killer.kill().err())
    }

    pub(crate) fn stop_monitor(&mut self) {
        if let Some(handle) = self.monitor.take() {
            handle.abort();
        }
    }

    pub(crate) fn monitor_running(&self) -> bool {
        self.monitor.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Milliseconds since the record was created.
    pub fn elapsed_ms(&self) -> u64 {
        (Utc::now() - self.start_time).num_milliseconds().max(0) as u64
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            id: self.id.clone(),
            persona: self.persona.clone(),
            status: self.status,
            task: self.task.clone(),
            start_time: self.start_time,
            pid: self.pid,
            message_history: self.message_history.clone(),
            context: self.context.clone(),
            completion_report: self.completion_report.clone(),
            brave: self.brave,
            usage: self.usage,
            files_modified: self.files_modified.iter().cloned().collect(),
        }
    }
}

/// Cloneable view of an [`AgentProcess`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSnapshot {
    pub id: String,
    pub persona: Persona,
    pub status: AgentStatus,
    pub task: String,
    pub start_time: DateTime<Utc>,
    pub pid: Option<u32>,
    pub message_history: Vec<HistoryEntry>,
    pub context: AgentContext,
    pub completion_report: Option<CompletionReport>,
    pub brave: bool,
    pub usage: TokenUsage,
    pub files_modified: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_edited_path() {
        let input = json!({"file_path": "/repo/a.rs", "content": "x"});
        assert_eq!(edited_path("Write", &input), Some("/repo/a.rs"));
        assert_eq!(edited_path("Read", &input), None);

        let nb = json!({"notebook_path": "/repo/n.ipynb"});
        assert_eq!(edited_path("NotebookEdit", &nb), Some("/repo/n.ipynb"));
        assert_eq!(edited_path("Edit", &json!({})), None);
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&AgentStatus::Complete).unwrap(), "\"complete\"");
        assert_eq!(AgentStatus::Error.to_string(), "error");
        assert!(AgentStatus::Active.is_active());
        assert!(!AgentStatus::Idle.is_active());
    }

    #[test]
    fn test_first_message_tracks_history() {
        let mut agent = AgentProcess::new("a", Persona::default(), "task", PathBuf::from("/repo"));
        assert!(agent.is_first_message());
        agent.message_history.push(HistoryEntry::user("hi"));
        assert!(!agent.is_first_message());
    }

    #[test]
    fn test_persona_deserializes_camel_case() {
        let persona: Persona = serde_json::from_str(
            r#"{"name":"tester","model":"sonnet","allowedTools":["Read"],"maxBudgetUsd":1.5}"#,
        )
        .unwrap();
        assert_eq!(persona.model.as_deref(), Some("sonnet"));
        assert_eq!(persona.allowed_tools, vec!["Read".to_string()]);
        assert_eq!(persona.max_budget_usd, Some(1.5));
    }
}
