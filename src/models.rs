// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! On-disk cache of the models the coding agent offers.
//!
//! Listing models means running the agent executable, which is slow, so the
//! list is cached at `~/.workforce/models-cache.json`. Callers always get an
//! answer immediately: the cached list when there is one (even a stale one),
//! otherwise a small built-in fallback. A stale or missing cache triggers one
//! background refresh.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::ModelCacheError;

/// Cache file name inside the global workforce directory.
pub const CACHE_FILE: &str = "models-cache.json";

/// How long a cached list counts as fresh.
pub const CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default timeout for the model listing invocation.
pub const LIST_TIMEOUT: Duration = Duration::from_secs(30);

/// A model the agent can run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ModelInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Persisted cache document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCacheEntry {
    /// Milliseconds since the Unix epoch.
    pub last_updated: i64,
    pub models: Vec<ModelInfo>,
}

impl ModelCacheEntry {
    pub fn new(models: Vec<ModelInfo>) -> Self {
        Self {
            last_updated: Utc::now().timestamp_millis(),
            models,
        }
    }

    /// Age of the entry; future timestamps count as fresh.
    pub fn age(&self) -> Duration {
        let millis = Utc::now().timestamp_millis() - self.last_updated;
        Duration::from_millis(millis.max(0) as u64)
    }
}

/// Models served when nothing has been cached yet.
pub fn fallback_models() -> Vec<ModelInfo> {
    vec![
        ModelInfo::new("sonnet").with_name("Sonnet"),
        ModelInfo::new("opus").with_name("Opus"),
        ModelInfo::new("haiku").with_name("Haiku"),
    ]
}

/// Source of the authoritative model list.
#[async_trait]
pub trait ModelLister: Send + Sync {
    async fn list(&self) -> Result<Vec<ModelInfo>, ModelCacheError>;
}

/// Lists models by running the agent executable.
#[derive(Debug, Clone)]
pub struct CliModelLister {
    executable: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CliModelLister {
    pub fn new(executable: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            executable: executable.into(),
            args,
            timeout: LIST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ModelLister for CliModelLister {
    async fn list(&self) -> Result<Vec<ModelInfo>, ModelCacheError> {
        let run = Command::new(&self.executable)
            .args(&self.args)
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| ModelCacheError::Timeout(self.timeout.as_millis() as u64))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ModelCacheError::ListFailed(format!(
                "{} exited with {}: {}",
                self.executable.display(),
                output.status,
                stderr.trim()
            )));
        }
        parse_model_list(&String::from_utf8_lossy(&output.stdout))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawModel {
    Id(String),
    Info {
        id: String,
        #[serde(default, alias = "display_name", alias = "displayName")]
        name: Option<String>,
    },
}

/// Parse a JSON array of model ids or `{id, name}` objects.
///
/// Text around the array (banners, warnings) is ignored.
pub fn parse_model_list(output: &str) -> Result<Vec<ModelInfo>, ModelCacheError> {
    let trimmed = output.trim();
    let raw: Vec<RawModel> = match serde_json::from_str(trimmed) {
        Ok(raw) => raw,
        Err(first) => {
            let start = trimmed.find('[');
            let end = trimmed.rfind(']');
            match (start, end) {
                (Some(start), Some(end)) if start < end => {
                    serde_json::from_str(&trimmed[start..=end])?
                }
                _ => return Err(first.into()),
            }
        }
    };

    let models: Vec<ModelInfo> = raw
        .into_iter()
        .map(|m| match m {
            RawModel::Id(id) => ModelInfo::new(id),
            RawModel::Info { id, name } => ModelInfo { id, name },
        })
        .filter(|m| !m.id.is_empty())
        .collect();

    if models.is_empty() {
        return Err(ModelCacheError::Parse("model list is empty".to_string()));
    }
    Ok(models)
}

struct RefreshGuard(Arc<AtomicBool>);

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Stale-while-revalidate model cache.
#[derive(Clone)]
pub struct ModelCache {
    path: PathBuf,
    lister: Arc<dyn ModelLister>,
    ttl: Duration,
    refreshing: Arc<AtomicBool>,
}

impl ModelCache {
    pub fn new(path: impl Into<PathBuf>, lister: Arc<dyn ModelLister>) -> Self {
        Self {
            path: path.into(),
            lister,
            ttl: CACHE_TTL,
            refreshing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cache stored in the global workforce directory.
    pub fn in_home(lister: Arc<dyn ModelLister>) -> Result<Self, ModelCacheError> {
        let path = crate::config::get_global_config_dir()
            .ok_or(ModelCacheError::NoCacheDir)?
            .join(CACHE_FILE);
        Ok(Self::new(path, lister))
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a refresh is running.
    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::SeqCst)
    }

    /// Models to show right now.
    ///
    /// Never waits for the lister. A stale or missing cache starts a
    /// background refresh.
    pub async fn list_models(&self) -> Vec<ModelInfo> {
        match self.read_cache().await {
            Some(entry) => {
                if entry.age() > self.ttl {
                    debug!(age_secs = entry.age().as_secs(), "Model cache is stale");
                    self.spawn_refresh();
                }
                entry.models
            }
            None => {
                self.spawn_refresh();
                fallback_models()
            }
        }
    }

    /// Refresh the cache now.
    ///
    /// Returns `Ok(None)` when another refresh is already running. On
    /// failure the existing cache is left untouched.
    pub async fn refresh_models(&self) -> Result<Option<Vec<ModelInfo>>, ModelCacheError> {
        let Some(_guard) = self.try_begin_refresh() else {
            return Ok(None);
        };
        self.run_refresh().await.map(Some)
    }

    /// Read the cached entry, if any.
    pub async fn read_cache(&self) -> Option<ModelCacheEntry> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), "Failed to read model cache: {}", e);
                return None;
            }
        };
        match serde_json::from_str::<ModelCacheEntry>(&content) {
            Ok(entry) if !entry.models.is_empty() => Some(entry),
            Ok(_) => None,
            Err(e) => {
                warn!(path = %self.path.display(), "Ignoring corrupt model cache: {}", e);
                None
            }
        }
    }

    /// Claim the refresh slot. The slot is released when the guard drops,
    /// including when the refreshing future is cancelled.
    fn try_begin_refresh(&self) -> Option<RefreshGuard> {
        self.refreshing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RefreshGuard(Arc::clone(&self.refreshing)))
    }

    fn spawn_refresh(&self) -> bool {
        let Some(guard) = self.try_begin_refresh() else {
            return false;
        };
        let cache = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = cache.run_refresh().await {
                warn!("Background model refresh failed: {}", e);
            }
        });
        true
    }

    async fn run_refresh(&self) -> Result<Vec<ModelInfo>, ModelCacheError> {
        let models = self.lister.list().await?;
        let entry = ModelCacheEntry::new(models.clone());

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_string_pretty(&entry)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        info!(count = models.len(), path = %self.path.display(), "Model cache refreshed");
        Ok(models)
    }
}
