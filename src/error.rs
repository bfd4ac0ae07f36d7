// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the agent workforce.
//!
//! This module provides strongly-typed errors for the different parts of the
//! orchestration core, using `thiserror` for ergonomic error definitions and
//! `anyhow` for error propagation at the application boundary.

use thiserror::Error;

/// Errors that can occur while launching an agent subprocess.
#[derive(Error, Debug)]
pub enum SpawnError {
    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),

    #[error("Failed to open pseudo-terminal: {0}")]
    Pty(String),

    #[error("Failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },
}

impl SpawnError {
    /// Create a spawn error for a program.
    pub fn spawn(program: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Spawn {
            program: program.into(),
            message: message.to_string(),
        }
    }

    /// Short machine-readable kind, used as the error type on emitted events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ExecutableNotFound(_) => "executable_not_found",
            Self::Pty(_) => "pty_error",
            Self::Spawn { .. } => "spawn_error",
        }
    }
}

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Config file already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid config format: {0}")]
    InvalidFormat(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Errors that can occur while listing or caching models.
#[derive(Error, Debug)]
pub enum ModelCacheError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Invalid model list: {0}")]
    Parse(String),

    #[error("Model listing failed: {0}")]
    ListFailed(String),

    #[error("Model listing timed out after {0}ms")]
    Timeout(u64),

    #[error("Cache directory unavailable")]
    NoCacheDir,
}

impl From<std::io::Error> for ModelCacheError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ModelCacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;
