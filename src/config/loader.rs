// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Locating and reading configuration files.
//!
//! Every layer accepts JSON or YAML. Within a layer the first existing file
//! in the listed order wins; other candidates are ignored.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

use super::types::WorkspaceConfig;

/// Workspace config candidates, relative to the workspace root.
pub const WORKSPACE_CONFIG_FILES: &[&str] = &[
    ".workforce.json",
    ".workforce.yaml",
    ".workforce.yml",
    ".workforce/config.json",
    ".workforce/config.yaml",
    "workforce.config.json",
    "workforce.config.yaml",
];

/// Per-directory override candidates, usually gitignored.
pub const LOCAL_CONFIG_FILES: &[&str] = &[
    ".workforce.local.json",
    ".workforce.local.yaml",
    ".workforce.local.yml",
];

/// Global config candidates inside [`GLOBAL_CONFIG_DIR`].
pub const GLOBAL_CONFIG_FILES: &[&str] = &["config.json", "config.yaml", "config.yml"];

/// Global config directory name, under the home directory.
pub const GLOBAL_CONFIG_DIR: &str = ".workforce";

/// On-disk format of a config file, chosen by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigFormat {
    #[default]
    Json,
    Yaml,
}

impl ConfigFormat {
    /// `.yaml`/`.yml` are YAML; anything else is read as JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                Self::Yaml
            }
            _ => Self::Json,
        }
    }

    /// Workspace file name written by [`init_config`].
    pub fn workspace_file(self) -> &'static str {
        match self {
            Self::Json => ".workforce.json",
            Self::Yaml => ".workforce.yaml",
        }
    }

    pub fn parse(self, content: &str) -> Result<WorkspaceConfig, ConfigError> {
        match self {
            Self::Json => Ok(serde_json::from_str(content)?),
            // An empty YAML document is an empty config.
            Self::Yaml if content.trim().is_empty() => Ok(WorkspaceConfig::default()),
            Self::Yaml => Ok(serde_yaml::from_str(content)?),
        }
    }

    pub fn render(self, config: &WorkspaceConfig) -> Result<String, ConfigError> {
        match self {
            Self::Json => Ok(serde_json::to_string_pretty(config)?),
            Self::Yaml => Ok(serde_yaml::to_string(config)?),
        }
    }
}

/// Get the global config directory path.
pub fn get_global_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(GLOBAL_CONFIG_DIR))
}

/// The global config file in use, if one exists.
pub fn get_global_config_path() -> Option<PathBuf> {
    get_global_config_dir().and_then(|dir| first_existing(&dir, GLOBAL_CONFIG_FILES))
}

pub(super) fn first_existing(dir: &Path, candidates: &[&str]) -> Option<PathBuf> {
    candidates
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

fn load_optional(path: Option<PathBuf>) -> Result<Option<WorkspaceConfig>, ConfigError> {
    path.map(|p| load_config_file(&p)).transpose()
}

/// Load the global configuration from `~/.workforce/`.
pub fn load_global_config() -> Result<Option<WorkspaceConfig>, ConfigError> {
    load_optional(get_global_config_path())
}

/// Load the workspace configuration from the first file in
/// [`WORKSPACE_CONFIG_FILES`] that exists under `workspace_root`.
pub fn load_workspace_config(
    workspace_root: &Path,
) -> Result<Option<WorkspaceConfig>, ConfigError> {
    load_optional(workspace_config_path(workspace_root))
}

/// Load the per-directory override file.
pub fn load_local_config(workspace_root: &Path) -> Result<Option<WorkspaceConfig>, ConfigError> {
    load_optional(first_existing(workspace_root, LOCAL_CONFIG_FILES))
}

/// Workspace config file under `dir`, skipping the global config when `dir`
/// is the home directory.
pub(super) fn workspace_config_path(dir: &Path) -> Option<PathBuf> {
    let global_dir = get_global_config_dir();
    WORKSPACE_CONFIG_FILES
        .iter()
        .map(|name| dir.join(name))
        .filter(|path| {
            global_dir
                .as_deref()
                .map_or(true, |global| !path.starts_with(global))
        })
        .find(|path| path.is_file())
}

/// Load a configuration file in the format its extension names.
pub fn load_config_file(path: &Path) -> Result<WorkspaceConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    ConfigFormat::from_path(path).parse(&content)
}

/// Write `config` to `path` in the format its extension names.
pub fn save_config_file(path: &Path, config: &WorkspaceConfig) -> Result<(), ConfigError> {
    let content = ConfigFormat::from_path(path).render(config)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

/// Create the workspace config file.
///
/// Fails rather than overwrite when the workspace already has one.
pub fn init_config(
    workspace_root: &Path,
    config: Option<WorkspaceConfig>,
    format: ConfigFormat,
) -> Result<PathBuf, ConfigError> {
    if let Some(existing) = workspace_config_path(workspace_root) {
        return Err(ConfigError::AlreadyExists(existing.display().to_string()));
    }
    let path = workspace_root.join(format.workspace_file());
    save_config_file(&path, &config.unwrap_or_default())?;
    Ok(path)
}

/// Walk up from `start` to the nearest directory holding a workspace config.
pub fn find_workspace_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| workspace_config_path(dir).is_some())
        .map(Path::to_path_buf)
}

/// Example configuration written by `workforce init --example`.
pub fn get_example_config() -> WorkspaceConfig {
    WorkspaceConfig {
        model: Some("sonnet".to_string()),
        brave_mode: Some(false),
        disallowed_tools: Some(vec!["WebFetch".to_string()]),
        max_budget_usd: Some(5.0),
        additional_dirs: Some(vec!["../shared".to_string()]),
        loop_max_iterations: Some(10),
        ..Default::default()
    }
}
