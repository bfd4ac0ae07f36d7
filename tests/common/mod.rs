// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shared fixtures for pool integration tests.
//!
//! `FakeSpawner` stands in for the pseudo-terminal spawner: each spawn pops a
//! scripted output sequence and records the request it was given.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use workforce::error::SpawnError;
use workforce::orchestrate::{
    AgentPool, CliConfig, PoolEvent, PoolOptions, ProcessKiller, ProcessOutput, ProcessSpawner,
    ResourceProbe, ResourceSample, SpawnRequest, SpawnedProcess,
};

pub const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Output lines
// ============================================================================

fn line(value: serde_json::Value) -> Vec<u8> {
    let mut bytes = value.to_string().into_bytes();
    bytes.push(b'\n');
    bytes
}

pub fn text_line(text: &str) -> Vec<u8> {
    line(serde_json::json!({
        "type": "assistant",
        "message": {"content": [{"type": "text", "text": text}]}
    }))
}

pub fn tool_use_line(id: &str, tool: &str, file_path: &str) -> Vec<u8> {
    line(serde_json::json!({
        "type": "assistant",
        "message": {"content": [{
            "type": "tool_use",
            "id": id,
            "name": tool,
            "input": {"file_path": file_path}
        }]}
    }))
}

pub fn result_line(result: &str, input_tokens: u64, output_tokens: u64) -> Vec<u8> {
    line(serde_json::json!({
        "type": "result",
        "result": result,
        "usage": {"input_tokens": input_tokens, "output_tokens": output_tokens}
    }))
}

// ============================================================================
// Scripts
// ============================================================================

/// Output a fake process produces.
#[derive(Debug, Clone)]
pub struct Script {
    pub outputs: Vec<ProcessOutput>,
    /// Keep the output channel open until the process is killed.
    pub hold_open: bool,
}

impl Script {
    /// Says `text`, reports it as the result and exits 0.
    pub fn completes(text: &str) -> Self {
        Self {
            outputs: vec![
                ProcessOutput::Data(text_line(text)),
                ProcessOutput::Data(result_line(text, 10, 5)),
                ProcessOutput::Exited { code: Some(0) },
            ],
            hold_open: false,
        }
    }

    /// Exits with `code` without producing a result.
    pub fn exits(code: u32) -> Self {
        Self {
            outputs: vec![ProcessOutput::Exited { code: Some(code) }],
            hold_open: false,
        }
    }

    /// Emits `text` and then runs until killed.
    pub fn hangs(text: &str) -> Self {
        Self {
            outputs: vec![ProcessOutput::Data(text_line(text))],
            hold_open: true,
        }
    }

    pub fn from_lines(lines: Vec<Vec<u8>>, code: u32) -> Self {
        let mut outputs: Vec<ProcessOutput> = lines.into_iter().map(ProcessOutput::Data).collect();
        outputs.push(ProcessOutput::Exited { code: Some(code) });
        Self {
            outputs,
            hold_open: false,
        }
    }
}

// ============================================================================
// Spawner
// ============================================================================

#[derive(Debug)]
struct FakeKiller {
    sender: Option<mpsc::UnboundedSender<ProcessOutput>>,
    kills: Arc<AtomicUsize>,
}

impl ProcessKiller for FakeKiller {
    fn kill(&mut self) -> std::io::Result<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(ProcessOutput::Exited { code: None });
        }
        Ok(())
    }
}

/// Scripted stand-in for the pseudo-terminal spawner.
pub struct FakeSpawner {
    requests: Mutex<Vec<SpawnRequest>>,
    scripts: Mutex<VecDeque<Script>>,
    default_script: Mutex<Script>,
    fail: AtomicBool,
    missing: AtomicBool,
    kills: Arc<AtomicUsize>,
    next_pid: AtomicU32,
}

impl FakeSpawner {
    pub fn new(default_script: Script) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            scripts: Mutex::new(VecDeque::new()),
            default_script: Mutex::new(default_script),
            fail: AtomicBool::new(false),
            missing: AtomicBool::new(false),
            kills: Arc::new(AtomicUsize::new(0)),
            next_pid: AtomicU32::new(4_000),
        })
    }

    /// Script for the next spawn, ahead of the default.
    pub fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn set_default(&self, script: Script) {
        *self.default_script.lock().unwrap() = script;
    }

    pub fn fail_spawns(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Report the executable as missing on every spawn.
    pub fn missing_executable(&self, missing: bool) {
        self.missing.store(missing, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<SpawnRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, agent_id: &str) -> Vec<SpawnRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.agent_id == agent_id)
            .collect()
    }

    pub fn kill_count(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

impl ProcessSpawner for FakeSpawner {
    fn spawn(&self, request: SpawnRequest) -> Result<SpawnedProcess, SpawnError> {
        let program = request.program.display().to_string();
        self.requests.lock().unwrap().push(request);
        if self.missing.load(Ordering::SeqCst) {
            return Err(SpawnError::ExecutableNotFound(program));
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(SpawnError::spawn(program, "scripted failure"));
        }

        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_script.lock().unwrap().clone());

        let (tx, rx) = mpsc::unbounded_channel();
        for output in script.outputs {
            tx.send(output).unwrap();
        }
        let sender = script.hold_open.then_some(tx);

        Ok(SpawnedProcess {
            pid: Some(self.next_pid.fetch_add(1, Ordering::SeqCst)),
            output: rx,
            killer: Box::new(FakeKiller {
                sender,
                kills: Arc::clone(&self.kills),
            }),
        })
    }
}

// ============================================================================
// Probe
// ============================================================================

/// Resource probe that either reports a fixed sample or says the process is gone.
#[derive(Debug, Default)]
pub struct FakeProbe {
    sample: Option<ResourceSample>,
    calls: AtomicUsize,
}

impl FakeProbe {
    pub fn gone() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fixed(cpu_percent: f32, memory_mb: f64) -> Arc<Self> {
        Arc::new(Self {
            sample: Some(ResourceSample {
                cpu_percent,
                memory_mb,
            }),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceProbe for FakeProbe {
    async fn sample(&self, _pid: u32) -> Option<ResourceSample> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sample
    }
}

// ============================================================================
// Pool helpers
// ============================================================================

pub fn fast_options() -> PoolOptions {
    PoolOptions::default()
        .with_report_grace(Duration::from_millis(20))
        .with_loop_delay(Duration::from_millis(10))
        .with_monitor_interval(Duration::from_secs(3_600))
}

/// Invocation template with a fixed PATH so no login shell is queried.
pub fn test_config(root: &Path) -> CliConfig {
    CliConfig::new("claude", root).with_env("PATH", "/usr/bin:/bin")
}

pub fn test_pool(root: &Path, spawner: Arc<FakeSpawner>) -> AgentPool {
    AgentPool::builder(test_config(root))
        .with_options(fast_options())
        .with_spawner(spawner)
        .with_probe(FakeProbe::gone())
        .build()
}

/// Receive events until one matches `pred`, returning everything seen.
///
/// Panics when nothing matches within [`WAIT`].
pub async fn collect_until<F>(rx: &mut broadcast::Receiver<PoolEvent>, pred: F) -> Vec<PoolEvent>
where
    F: Fn(&PoolEvent) -> bool,
{
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let event = tokio::time::timeout_at(deadline, rx.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for event; saw {:#?}", seen))
            .expect("event channel closed");
        let done = pred(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

pub async fn wait_for<F>(rx: &mut broadcast::Receiver<PoolEvent>, pred: F) -> PoolEvent
where
    F: Fn(&PoolEvent) -> bool,
{
    collect_until(rx, pred)
        .await
        .pop()
        .expect("collect_until returns the matching event")
}

/// Events that arrive within `window`.
pub async fn drain_for(
    rx: &mut broadcast::Receiver<PoolEvent>,
    window: Duration,
) -> Vec<PoolEvent> {
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Ok(event)) = tokio::time::timeout_at(deadline, rx.recv()).await {
        seen.push(event);
    }
    seen
}

pub fn is_status(event: &PoolEvent, agent: &str, wanted: workforce::AgentStatus) -> bool {
    matches!(
        event,
        PoolEvent::StatusChanged { agent_id, status } if agent_id == agent && *status == wanted
    )
}
