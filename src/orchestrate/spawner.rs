// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Launching agent subprocesses.
//!
//! The pool talks to subprocesses through [`ProcessSpawner`]. The production
//! implementation, [`PtySpawner`], runs each invocation attached to a native
//! pseudo-terminal so the agent behaves as if it were run interactively.
//! Raw output is forwarded as it is read; parsing happens in the pool.

use std::ffi::OsString;
use std::io::Read;
use std::path::PathBuf;
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, PtySize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::SpawnError;

/// Default terminal geometry for agent subprocesses.
pub const DEFAULT_PTY_ROWS: u16 = 50;
pub const DEFAULT_PTY_COLS: u16 = 512;

const READ_BUFFER_SIZE: usize = 8192;

/// How long to keep reading after the agent exits before reporting the exit.
const EXIT_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// A fully-resolved subprocess invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnRequest {
    /// Agent the process belongs to.
    pub agent_id: String,
    /// Executable to run.
    pub program: PathBuf,
    /// Argument vector, prompt last.
    pub args: Vec<String>,
    /// Working directory.
    pub cwd: PathBuf,
    /// Environment overrides on top of the inherited environment.
    pub env: Vec<(String, String)>,
}

impl SpawnRequest {
    /// The final positional argument.
    pub fn prompt(&self) -> Option<&str> {
        self.args.last().map(String::as_str)
    }

    /// Whether `flag` appears in the argument vector.
    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }

    /// Value following `flag`, if present.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

/// Output from a running subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutput {
    /// A raw chunk, split at arbitrary boundaries.
    Data(Vec<u8>),
    /// The process exited. `None` when the exit status could not be read.
    Exited { code: Option<u32> },
}

/// Handle used to kill a running subprocess.
pub trait ProcessKiller: Send + Sync + std::fmt::Debug {
    fn kill(&mut self) -> std::io::Result<()>;
}

/// A launched subprocess.
#[derive(Debug)]
pub struct SpawnedProcess {
    pub pid: Option<u32>,
    pub output: mpsc::UnboundedReceiver<ProcessOutput>,
    pub killer: Box<dyn ProcessKiller>,
}

/// Launches agent subprocesses.
pub trait ProcessSpawner: Send + Sync {
    /// Start the process without waiting for it.
    fn spawn(&self, request: SpawnRequest) -> Result<SpawnedProcess, SpawnError>;
}

// ============================================================================
// Pseudo-terminal spawner
// ============================================================================

/// Spawns subprocesses on a native pseudo-terminal.
///
/// Each process gets a reader thread draining the terminal and a waiter
/// thread that reports the exit as soon as the agent itself is gone.
#[derive(Debug, Clone)]
pub struct PtySpawner {
    size: PtySize,
}

impl Default for PtySpawner {
    fn default() -> Self {
        Self::new(DEFAULT_PTY_ROWS, DEFAULT_PTY_COLS)
    }
}

impl PtySpawner {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self {
            size: PtySize {
                rows: rows.max(1),
                cols: cols.max(1),
                pixel_width: 0,
                pixel_height: 0,
            },
        }
    }
}

struct PtyKiller(Box<dyn ChildKiller + Send + Sync>);

impl std::fmt::Debug for PtyKiller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyKiller").finish_non_exhaustive()
    }
}

impl ProcessKiller for PtyKiller {
    fn kill(&mut self) -> std::io::Result<()> {
        self.0.kill()
    }
}

/// Locate `program` the way the child would, using the request's `PATH` when set.
fn locate_program(request: &SpawnRequest) -> Result<PathBuf, SpawnError> {
    let program = &request.program;
    if program.components().count() > 1 {
        let full = if program.is_absolute() {
            program.clone()
        } else {
            request.cwd.join(program)
        };
        return if full.is_file() {
            Ok(full)
        } else {
            Err(SpawnError::ExecutableNotFound(program.display().to_string()))
        };
    }

    let search_path = request
        .env
        .iter()
        .rev()
        .find(|(key, _)| key == "PATH")
        .map(|(_, value)| OsString::from(value))
        .or_else(|| std::env::var_os("PATH"));
    which::which_in(program, search_path, &request.cwd)
        .map_err(|_| SpawnError::ExecutableNotFound(program.display().to_string()))
}

impl ProcessSpawner for PtySpawner {
    fn spawn(&self, request: SpawnRequest) -> Result<SpawnedProcess, SpawnError> {
        let resolved = locate_program(&request)?;
        let program = request.program.display().to_string();
        let pair = native_pty_system()
            .openpty(self.size)
            .map_err(|e| SpawnError::Pty(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&resolved);
        cmd.args(&request.args);
        cmd.cwd(&request.cwd);
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SpawnError::spawn(&program, e))?;
        // The child holds its own slave handle; ours must close for EOF.
        drop(pair.slave);

        let pid = child.process_id();
        let killer = PtyKiller(child.clone_killer());
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SpawnError::Pty(e.to_string()))?;
        let master = pair.master;

        let (tx, rx) = mpsc::unbounded_channel();
        // Dropped by the reader on EOF.
        let (drained_tx, drained_rx) = std_mpsc::channel::<()>();

        // Plain threads: a grandchild holding the terminal open can keep the
        // reader blocked long after the agent exits.
        let data_tx = tx.clone();
        thread::spawn(move || {
            let _master = master;
            let _drained = drained_tx;
            let mut buf = [0u8; READ_BUFFER_SIZE];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if data_tx.send(ProcessOutput::Data(buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    // Linux reports EIO once the slave side is gone.
                    Err(_) => break,
                }
            }
        });

        let agent_id = request.agent_id;
        thread::spawn(move || {
            let code = match child.wait() {
                Ok(status) => Some(status.exit_code()),
                Err(e) => {
                    warn!(agent_id = %agent_id, "Failed to read exit status: {}", e);
                    None
                }
            };
            if let Err(RecvTimeoutError::Timeout) = drained_rx.recv_timeout(EXIT_DRAIN_TIMEOUT) {
                debug!(agent_id = %agent_id, "Terminal still held open after exit");
            }
            debug!(agent_id = %agent_id, ?code, "Agent process exited");
            let _ = tx.send(ProcessOutput::Exited { code });
        });

        Ok(SpawnedProcess {
            pid,
            output: rx,
            killer: Box::new(killer),
        })
    }
}
