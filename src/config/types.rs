// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! Defines the structure of workspace and resolved configuration,
//! supporting JSON and YAML formats.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;
use crate::orchestrate::{resolve_executable, CliConfig, Persona, PoolOptions, DEFAULT_EXECUTABLE};

/// Workspace configuration for the workforce.
/// Can be defined in .workforce.json or .workforce/config.json in the project root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceConfig {
    /// Coding-agent executable (name on PATH or absolute path)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,

    /// Model id passed with --model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Run the main agent with permission checks skipped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brave_mode: Option<bool>,

    /// Tools the agent may use ("*" or "all" for every tool)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,

    /// Tools the agent may not use
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disallowed_tools: Option<Vec<String>>,

    /// Spending cap per invocation, in US dollars
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_budget_usd: Option<f64>,

    /// MCP server configuration file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp_config: Option<String>,

    /// Extra directories the agent may read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_dirs: Option<Vec<String>>,

    /// Arguments that make the executable print its model list as JSON
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_list_args: Option<Vec<String>>,

    /// Resource sampling interval in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_monitor_interval_ms: Option<u64>,

    /// Delay between a sub-agent's report and its termination
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_grace_ms: Option<u64>,

    /// Delay between loop iterations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_delay_ms: Option<u64>,

    /// Default iteration budget for loops
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_max_iterations: Option<u32>,

    /// Named personas for sub-agents
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personas: Option<HashMap<String, Persona>>,
}

/// Default arguments for listing models.
pub fn default_model_list_args() -> Vec<String> {
    vec!["--list-models".to_string()]
}

/// Resolved configuration with all values set.
/// This is the merged result of global, workspace, local, and CLI configs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConfig {
    pub executable: String,
    pub model: Option<String>,
    pub brave_mode: bool,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    pub max_budget_usd: Option<f64>,
    pub mcp_config: Option<String>,
    pub additional_dirs: Vec<String>,
    pub model_list_args: Vec<String>,
    pub resource_monitor_interval_ms: u64,
    pub report_grace_ms: u64,
    pub loop_delay_ms: u64,
    pub loop_max_iterations: u32,
    pub personas: HashMap<String, Persona>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            executable: DEFAULT_EXECUTABLE.to_string(),
            model: None,
            brave_mode: false,
            allowed_tools: Vec::new(),
            disallowed_tools: Vec::new(),
            max_budget_usd: None,
            mcp_config: None,
            additional_dirs: Vec::new(),
            model_list_args: default_model_list_args(),
            resource_monitor_interval_ms: 2_000,
            report_grace_ms: 1_000,
            loop_delay_ms: 1_000,
            loop_max_iterations: 10,
            personas: HashMap::new(),
        }
    }
}

impl ResolvedConfig {
    /// Reject values the pool cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.executable.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "executable".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if let Some(budget) = self.max_budget_usd {
            if !budget.is_finite() || budget <= 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: "maxBudgetUsd".to_string(),
                    message: format!("must be a positive amount, got {}", budget),
                });
            }
        }
        if self.loop_max_iterations == 0 {
            return Err(ConfigError::InvalidValue {
                field: "loopMaxIterations".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.resource_monitor_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "resourceMonitorIntervalMs".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Executable path, resolved through PATH and the login shell when possible.
    ///
    /// An unresolvable name is kept as-is; spawning it later reports the error
    /// on the agent's status.
    pub fn executable_path(&self) -> PathBuf {
        resolve_executable(&self.executable).unwrap_or_else(|e| {
            warn!("{}", e);
            PathBuf::from(&self.executable)
        })
    }

    /// Build the pool's invocation template for `workspace_root`.
    pub fn cli_config(&self, workspace_root: &Path) -> CliConfig {
        CliConfig::new(self.executable_path(), workspace_root)
            .with_model(self.model.clone())
            .with_tools(self.allowed_tools.clone(), self.disallowed_tools.clone())
            .with_max_budget(self.max_budget_usd)
            .with_mcp_config(self.mcp_config.as_deref().map(|p| resolve_path(workspace_root, p)))
            .with_additional_dirs(
                self.additional_dirs
                    .iter()
                    .map(|d| resolve_path(workspace_root, d))
                    .collect(),
            )
    }

    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions::default()
            .with_report_grace(Duration::from_millis(self.report_grace_ms))
            .with_loop_delay(Duration::from_millis(self.loop_delay_ms))
            .with_monitor_interval(Duration::from_millis(self.resource_monitor_interval_ms))
    }

    /// Persona by name; unknown names get a default persona with that name.
    pub fn persona(&self, name: &str) -> Persona {
        self.personas
            .get(name)
            .cloned()
            .map(|mut p| {
                if p.name.is_empty() {
                    p.name = name.to_string();
                }
                p
            })
            .unwrap_or_else(|| Persona::new(name))
    }
}

fn resolve_path(root: &Path, path: &str) -> PathBuf {
    let expanded = match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir().map(|h| h.join(rest)),
        None => None,
    };
    let path = expanded.unwrap_or_else(|| PathBuf::from(path));
    if path.is_absolute() {
        path
    } else {
        root.join(path)
    }
}
