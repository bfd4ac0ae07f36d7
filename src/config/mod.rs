// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Workforce configuration.
//!
//! Four layers, later ones winning:
//! - global: `~/.workforce/config.{json,yaml,yml}`
//! - workspace: `.workforce.{json,yaml,yml}`, `.workforce/config.{json,yaml}`
//!   or `workforce.config.{json,yaml}`
//! - local: `.workforce.local.{json,yaml,yml}`
//! - command-line options
//!
//! The merged result is validated once, after merging.

mod loader;
mod merger;
mod types;

pub use loader::{
    find_workspace_root, get_example_config, get_global_config_dir, get_global_config_path,
    init_config, load_config_file, load_global_config, load_local_config, load_workspace_config,
    save_config_file, ConfigFormat, GLOBAL_CONFIG_DIR, GLOBAL_CONFIG_FILES, LOCAL_CONFIG_FILES,
    WORKSPACE_CONFIG_FILES,
};

pub use merger::{default_config, merge_config, CliOptions};

pub use types::{default_model_list_args, ResolvedConfig, WorkspaceConfig};

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Load, merge and validate every configuration layer for a workspace.
pub fn load_config(
    workspace_root: &Path,
    cli_options: CliOptions,
) -> Result<ResolvedConfig, ConfigError> {
    let global = load_global_config()?;
    let workspace = load_workspace_config(workspace_root)?;
    let local = load_local_config(workspace_root)?;

    let config = merge_config(global, workspace, local, cli_options);
    config.validate()?;
    Ok(config)
}

/// Config files that contribute to a workspace, lowest precedence first.
pub fn config_sources(workspace_root: &Path) -> Vec<PathBuf> {
    get_global_config_path()
        .into_iter()
        .chain(loader::workspace_config_path(workspace_root))
        .chain(loader::first_existing(workspace_root, LOCAL_CONFIG_FILES))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_with_no_files() {
        let temp = TempDir::new().unwrap();
        // Executable may come from a global config; it is always set.
        let config = load_config(temp.path(), CliOptions::default()).unwrap();
        assert!(!config.executable.is_empty());
    }

    #[test]
    fn test_load_config_local_and_cli_override() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::write(root.join(".workforce.yaml"), "model: opus\nmaxBudgetUsd: 3.5\n").unwrap();
        std::fs::write(root.join(".workforce.local.json"), r#"{"model": "sonnet"}"#).unwrap();

        let config = load_config(temp.path(), CliOptions::default()).unwrap();
        assert_eq!(config.model, Some("sonnet".to_string()));
        assert_eq!(config.max_budget_usd, Some(3.5));

        let cli = CliOptions {
            model: Some("haiku".to_string()),
            ..Default::default()
        };
        let config = load_config(temp.path(), cli).unwrap();
        assert_eq!(config.model, Some("haiku".to_string()));
    }

    #[test]
    fn test_load_config_rejects_invalid_values() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(".workforce.json"), r#"{"loopMaxIterations": 0}"#).unwrap();
        let err = load_config(temp.path(), CliOptions::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_config_sources_in_precedence_order() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(".workforce.yaml"), "model: opus\n").unwrap();
        std::fs::write(temp.path().join(".workforce.local.json"), "{}").unwrap();

        let sources = config_sources(temp.path());
        let local: Vec<_> = sources
            .iter()
            .filter(|p| p.starts_with(temp.path()))
            .collect();
        assert_eq!(
            local,
            vec![
                &temp.path().join(".workforce.yaml"),
                &temp.path().join(".workforce.local.json"),
            ]
        );
    }
}
