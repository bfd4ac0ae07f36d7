// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Executable and `PATH` resolution for agent subprocesses.
//!
//! GUI launchers and service managers often start us with a minimal `PATH`
//! that lacks the user's tool directories. The interactive login shell's
//! `PATH` is resolved once, bounded by a timeout, and cached after the first
//! success.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use once_cell::sync::{Lazy, OnceCell};
use tracing::{debug, warn};

use crate::error::SpawnError;

/// Upper bound on how long the login shell may take to print its `PATH`.
pub const SHELL_PATH_TIMEOUT: Duration = Duration::from_secs(3);

const PATH_MARKER: &str = "__WORKFORCE_PATH__";

static SHELL_PATH: OnceCell<String> = OnceCell::new();
static EXECUTABLES: Lazy<Mutex<HashMap<String, PathBuf>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// `PATH` as seen by the user's interactive login shell.
///
/// Falls back to the inherited `PATH` (uncached) when the shell cannot be
/// queried in time.
pub fn resolve_shell_path() -> String {
    if let Some(path) = SHELL_PATH.get() {
        return path.clone();
    }

    match query_shell_path(SHELL_PATH_TIMEOUT) {
        Some(path) => {
            debug!(path = %path, "Resolved interactive shell PATH");
            SHELL_PATH.get_or_init(|| path).clone()
        }
        None => std::env::var("PATH").unwrap_or_default(),
    }
}

/// Locate `name` on the inherited `PATH`, then on the shell `PATH`.
///
/// Absolute or relative paths are accepted as-is when they exist.
pub fn resolve_executable(name: &str) -> Result<PathBuf, SpawnError> {
    if let Some(found) = lock_cache().get(name) {
        return Ok(found.clone());
    }

    let candidate = Path::new(name);
    let resolved = if candidate.components().count() > 1 {
        candidate.is_file().then(|| candidate.to_path_buf())
    } else {
        which::which(name).ok().or_else(|| {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            which::which_in(name, Some(resolve_shell_path()), cwd).ok()
        })
    };

    match resolved {
        Some(path) => {
            debug!(name, path = %path.display(), "Resolved executable");
            lock_cache().insert(name.to_string(), path.clone());
            Ok(path)
        }
        None => Err(SpawnError::ExecutableNotFound(name.to_string())),
    }
}

fn lock_cache() -> std::sync::MutexGuard<'static, HashMap<String, PathBuf>> {
    EXECUTABLES.lock().unwrap_or_else(|e| e.into_inner())
}

fn query_shell_path(timeout: Duration) -> Option<String> {
    let shell = std::env::var("SHELL").ok().filter(|s| !s.is_empty())?;
    let script = format!("printf '%s%s%s' '{m}' \"$PATH\" '{m}'", m = PATH_MARKER);

    let mut child = Command::new(&shell)
        .args(["-ilc", &script])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| warn!(shell = %shell, "Failed to start login shell: {}", e))
        .ok()?;

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => break,
            Ok(None) if Instant::now() >= deadline => {
                warn!(shell = %shell, "Login shell timed out resolving PATH");
                let _ = child.kill();
                let _ = child.wait();
                return None;
            }
            Ok(None) => std::thread::sleep(Duration::from_millis(20)),
            Err(e) => {
                warn!(shell = %shell, "Failed waiting for login shell: {}", e);
                return None;
            }
        }
    }

    let mut stdout = String::new();
    child.stdout.take()?.read_to_string(&mut stdout).ok()?;
    extract_marked_path(&stdout)
}

/// Pull the `PATH` out of shell output that may contain rc-file noise.
fn extract_marked_path(output: &str) -> Option<String> {
    let start = output.find(PATH_MARKER)? + PATH_MARKER.len();
    let rest = &output[start..];
    let end = rest.find(PATH_MARKER)?;
    let path = rest[..end].trim();
    (!path.is_empty()).then(|| path.to_string())
}
