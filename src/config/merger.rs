// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration merging.
//!
//! Handles merging configurations from different sources with proper precedence.

use super::types::{ResolvedConfig, WorkspaceConfig};

/// CLI options that can override configuration.
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub executable: Option<String>,
    pub model: Option<String>,
    pub brave_mode: Option<bool>,
    pub max_budget_usd: Option<f64>,
    pub mcp_config: Option<String>,
    pub additional_dirs: Vec<String>,
    pub allowed_tools: Option<Vec<String>>,
    pub disallowed_tools: Option<Vec<String>>,
}

/// Default configuration values.
pub fn default_config() -> ResolvedConfig {
    ResolvedConfig::default()
}

/// Merge multiple configurations with precedence.
///
/// Precedence (highest to lowest):
/// 1. CLI options
/// 2. Local config (.workforce.local.json)
/// 3. Workspace config (.workforce.json)
/// 4. Global config (~/.workforce/config.json)
/// 5. Default values
///
/// Scalars are replaced by later layers; lists are merged without duplicates.
pub fn merge_config(
    global: Option<WorkspaceConfig>,
    workspace: Option<WorkspaceConfig>,
    local: Option<WorkspaceConfig>,
    cli: CliOptions,
) -> ResolvedConfig {
    let mut result = default_config();

    for config in [global, workspace, local].into_iter().flatten() {
        apply_workspace_config(&mut result, &config);
    }

    // Apply CLI options (highest precedence)
    apply_cli_options(&mut result, &cli);

    result
}

fn merge_unique(target: &mut Vec<String>, items: &[String]) {
    for item in items {
        if !target.contains(item) {
            target.push(item.clone());
        }
    }
}

fn apply_workspace_config(result: &mut ResolvedConfig, config: &WorkspaceConfig) {
    if let Some(ref executable) = config.executable {
        result.executable = executable.clone();
    }

    if config.model.is_some() {
        result.model = config.model.clone();
    }

    if let Some(brave) = config.brave_mode {
        result.brave_mode = brave;
    }

    if let Some(ref tools) = config.allowed_tools {
        merge_unique(&mut result.allowed_tools, tools);
    }

    if let Some(ref tools) = config.disallowed_tools {
        merge_unique(&mut result.disallowed_tools, tools);
    }

    if config.max_budget_usd.is_some() {
        result.max_budget_usd = config.max_budget_usd;
    }

    if config.mcp_config.is_some() {
        result.mcp_config = config.mcp_config.clone();
    }

    if let Some(ref dirs) = config.additional_dirs {
        merge_unique(&mut result.additional_dirs, dirs);
    }

    if let Some(ref args) = config.model_list_args {
        result.model_list_args = args.clone();
    }

    if let Some(ms) = config.resource_monitor_interval_ms {
        result.resource_monitor_interval_ms = ms;
    }

    if let Some(ms) = config.report_grace_ms {
        result.report_grace_ms = ms;
    }

    if let Some(ms) = config.loop_delay_ms {
        result.loop_delay_ms = ms;
    }

    if let Some(max) = config.loop_max_iterations {
        result.loop_max_iterations = max;
    }

    if let Some(ref personas) = config.personas {
        result.personas.extend(personas.clone());
    }
}

fn apply_cli_options(result: &mut ResolvedConfig, cli: &CliOptions) {
    if let Some(ref executable) = cli.executable {
        result.executable = executable.clone();
    }

    if cli.model.is_some() {
        result.model = cli.model.clone();
    }

    if let Some(brave) = cli.brave_mode {
        result.brave_mode = brave;
    }

    if cli.max_budget_usd.is_some() {
        result.max_budget_usd = cli.max_budget_usd;
    }

    if cli.mcp_config.is_some() {
        result.mcp_config = cli.mcp_config.clone();
    }

    merge_unique(&mut result.additional_dirs, &cli.additional_dirs);

    // Explicit tool lists on the command line replace configured ones.
    if let Some(ref tools) = cli.allowed_tools {
        result.allowed_tools = tools.clone();
    }

    if let Some(ref tools) = cli.disallowed_tools {
        result.disallowed_tools = tools.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = default_config();
        assert_eq!(config.executable, "claude");
        assert!(!config.brave_mode);
    }

    #[test]
    fn test_merge_config_precedence() {
        let global = WorkspaceConfig {
            executable: Some("/opt/claude".to_string()),
            model: Some("global-model".to_string()),
            ..Default::default()
        };

        let workspace = WorkspaceConfig {
            model: Some("workspace-model".to_string()),
            ..Default::default()
        };

        let local = WorkspaceConfig {
            model: Some("local-model".to_string()),
            ..Default::default()
        };

        let result =
            merge_config(Some(global), Some(workspace), Some(local), CliOptions::default());
        assert_eq!(result.executable, "/opt/claude");
        assert_eq!(result.model, Some("local-model".to_string()));

        let cli = CliOptions {
            model: Some("cli-model".to_string()),
            ..Default::default()
        };
        let result = merge_config(None, None, None, cli);
        assert_eq!(result.model, Some("cli-model".to_string()));
    }

    #[test]
    fn test_merge_lists_without_duplicates() {
        let global = WorkspaceConfig {
            disallowed_tools: Some(vec!["Bash".to_string()]),
            additional_dirs: Some(vec!["/shared".to_string()]),
            ..Default::default()
        };
        let workspace = WorkspaceConfig {
            disallowed_tools: Some(vec!["Bash".to_string(), "WebFetch".to_string()]),
            ..Default::default()
        };
        let cli = CliOptions {
            additional_dirs: vec!["/shared".to_string(), "/extra".to_string()],
            ..Default::default()
        };

        let result = merge_config(Some(global), Some(workspace), None, cli);
        assert_eq!(result.disallowed_tools, vec!["Bash", "WebFetch"]);
        assert_eq!(result.additional_dirs, vec!["/shared", "/extra"]);
    }

    #[test]
    fn test_cli_tool_lists_replace() {
        let workspace = WorkspaceConfig {
            allowed_tools: Some(vec!["Read".to_string()]),
            ..Default::default()
        };
        let cli = CliOptions {
            allowed_tools: Some(vec!["*".to_string()]),
            ..Default::default()
        };
        let result = merge_config(None, Some(workspace), None, cli);
        assert_eq!(result.allowed_tools, vec!["*"]);
    }

    #[test]
    fn test_timing_overrides() {
        let local = WorkspaceConfig {
            report_grace_ms: Some(50),
            loop_delay_ms: Some(75),
            loop_max_iterations: Some(3),
            ..Default::default()
        };
        let result = merge_config(None, None, Some(local), CliOptions::default());
        assert_eq!(result.report_grace_ms, 50);
        assert_eq!(result.loop_delay_ms, 75);
        assert_eq!(result.loop_max_iterations, 3);
        assert_eq!(result.resource_monitor_interval_ms, 2_000);
    }
}
