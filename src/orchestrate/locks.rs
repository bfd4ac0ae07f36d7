// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Cross-agent advisory file locks.
//!
//! Lock state lives in a single JSON document under the project directory:
//!
//! ```text
//! {
//!   "agents": {
//!     "main":       { "lockedFiles": ["/repo/src/lib.rs"], "status": "active", "startTime": 1760000000000 },
//!     "agent-1a2b": { "lockedFiles": [], "status": "idle", "startTime": 1760000005000 }
//!   },
//!   "lastUpdated": 1760000009000
//! }
//! ```
//!
//! Every call reads the whole document, mutates it and writes it back through
//! a temporary file and a rename. Calls never block waiting for a lock, so
//! there is no deadlock. Storage errors are logged and the call fails open:
//! an unreadable document means "nothing is locked".

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Directory under the project root holding workforce state.
pub const STATE_DIR: &str = ".workforce";

/// File name of the persisted lock document.
pub const LOCK_FILE: &str = "locks.json";

/// Error raised while reading or writing the lock document.
#[derive(Debug, thiserror::Error)]
pub enum LockStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt lock document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Lock entry for one agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentLockEntry {
    #[serde(default)]
    pub locked_files: Vec<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub start_time: i64,
}

/// The persisted lock document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockDocument {
    #[serde(default)]
    pub agents: BTreeMap<String, AgentLockEntry>,
    #[serde(default)]
    pub last_updated: i64,
}

impl LockDocument {
    /// Find the agent holding `path`, if any.
    pub fn holder_of(&self, path: &str) -> Option<&str> {
        self.agents
            .iter()
            .find(|(_, entry)| entry.locked_files.iter().any(|f| f == path))
            .map(|(id, _)| id.as_str())
    }
}

/// Result of [`WorkforceLocks::is_locked`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockStatus {
    pub locked: bool,
    pub holder: Option<String>,
}

/// Coordinates write ownership of files between agents.
#[derive(Debug)]
pub struct WorkforceLocks {
    project_root: PathBuf,
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    guard: Mutex<()>,
}

impl WorkforceLocks {
    /// Lock coordinator for a project, stored at `<root>/.workforce/locks.json`.
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        let path = project_root.join(STATE_DIR).join(LOCK_FILE);
        Self {
            project_root,
            path,
            guard: Mutex::new(()),
        }
    }

    /// Use an explicit document path.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Path of the backing document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Try to claim `path` for `agent_id`.
    ///
    /// Granted unless another agent already holds it. Re-locking a path the
    /// agent already holds is granted without duplicating it.
    pub fn lock_file(&self, agent_id: &str, path: &str) -> bool {
        let path = self.normalize(path);
        let mut granted = true;
        self.mutate("lock_file", |doc| {
            if let Some(holder) = doc.holder_of(&path) {
                if holder != agent_id {
                    debug!(agent_id, holder, path = %path, "Lock denied");
                    granted = false;
                    return false;
                }
                return false;
            }
            let entry = doc
                .agents
                .entry(agent_id.to_string())
                .or_insert_with(|| new_entry("active"));
            entry.locked_files.push(path.clone());
            true
        });
        granted
    }

    /// Release one path held by `agent_id`.
    pub fn unlock_file(&self, agent_id: &str, path: &str) {
        let path = self.normalize(path);
        self.mutate("unlock_file", |doc| match doc.agents.get_mut(agent_id) {
            Some(entry) => {
                let before = entry.locked_files.len();
                entry.locked_files.retain(|f| f != &path);
                entry.locked_files.len() != before
            }
            None => false,
        });
    }

    /// Release every path held by `agent_id`.
    pub fn unlock_all(&self, agent_id: &str) {
        self.mutate("unlock_all", |doc| match doc.agents.get_mut(agent_id) {
            Some(entry) if !entry.locked_files.is_empty() => {
                entry.locked_files.clear();
                true
            }
            _ => false,
        });
    }

    /// Report whether any agent holds `path`.
    pub fn is_locked(&self, path: &str) -> LockStatus {
        let path = self.normalize(path);
        let holder = self
            .read_or_default("is_locked")
            .holder_of(&path)
            .map(str::to_string);
        LockStatus {
            locked: holder.is_some(),
            holder,
        }
    }

    /// Paths currently held by `agent_id`.
    pub fn locked_files(&self, agent_id: &str) -> Vec<String> {
        self.read_or_default("locked_files")
            .agents
            .remove(agent_id)
            .map(|entry| entry.locked_files)
            .unwrap_or_default()
    }

    /// Create an empty entry for `agent_id`. Existing entries are kept.
    pub fn register_agent(&self, agent_id: &str) {
        self.mutate("register_agent", |doc| {
            if doc.agents.contains_key(agent_id) {
                return false;
            }
            doc.agents.insert(agent_id.to_string(), new_entry("idle"));
            true
        });
    }

    /// Remove the entry for `agent_id`, releasing its locks.
    pub fn unregister_agent(&self, agent_id: &str) {
        self.mutate("unregister_agent", |doc| doc.agents.remove(agent_id).is_some());
    }

    /// Record the agent's current status.
    pub fn update_status(&self, agent_id: &str, status: &str) {
        self.mutate("update_status", |doc| match doc.agents.get_mut(agent_id) {
            Some(entry) if entry.status != status => {
                entry.status = status.to_string();
                true
            }
            _ => false,
        });
    }

    /// The whole persisted document.
    pub fn snapshot(&self) -> LockDocument {
        self.read_or_default("snapshot")
    }

    fn normalize(&self, path: &str) -> String {
        let raw = Path::new(path);
        let joined = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            self.project_root.join(raw)
        };

        let mut clean = PathBuf::new();
        for component in joined.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    clean.pop();
                }
                other => clean.push(other.as_os_str()),
            }
        }
        clean.to_string_lossy().into_owned()
    }

    /// Apply `change` to the document and persist it if it reports a change.
    fn mutate(&self, op: &str, change: impl FnOnce(&mut LockDocument) -> bool) {
        let _guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());

        let mut doc = match self.load() {
            Ok(doc) => doc,
            Err(e) => {
                warn!(op, path = %self.path.display(), "Lock document unreadable, skipping: {}", e);
                return;
            }
        };

        if !change(&mut doc) {
            return;
        }

        doc.last_updated = Utc::now().timestamp_millis();
        if let Err(e) = self.store(&doc) {
            warn!(op, path = %self.path.display(), "Failed to write lock document: {}", e);
        }
    }

    fn read_or_default(&self, op: &str) -> LockDocument {
        let _guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        self.load().unwrap_or_else(|e| {
            warn!(op, path = %self.path.display(), "Lock document unreadable: {}", e);
            LockDocument::default()
        })
    }

    fn load(&self) -> Result<LockDocument, LockStoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(LockDocument::default()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LockDocument::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, doc: &LockDocument) -> Result<(), LockStoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self
            .path
            .with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
        std::fs::write(&tmp, serde_json::to_string_pretty(doc)?)?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

fn new_entry(status: &str) -> AgentLockEntry {
    AgentLockEntry {
        locked_files: Vec::new(),
        status: status.to_string(),
        start_time: Utc::now().timestamp_millis(),
    }
}
