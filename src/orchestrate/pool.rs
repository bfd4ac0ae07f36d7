// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The agent process pool.
//!
//! One pool exists per open project. It owns the record of every live agent,
//! launches a fresh subprocess for every message, decodes each subprocess's
//! output with its own [`StreamParser`], and broadcasts the resulting
//! [`PoolEvent`]s to any number of subscribers.
//!
//! # Architecture
//!
//! ```text
//!  send_message ──► AgentProcess record ──► CliConfig::build_invocation
//!                                                   │
//!                                                   ▼
//!                                          ProcessSpawner::spawn
//!                                                   │ ProcessOutput
//!                                                   ▼
//!                       pump task ──► StreamParser ──► PoolEvent broadcast
//!                           │
//!                           ├── file-edit tool use ──► WorkforceLocks
//!                           └── completion ──► deferred queue ──► next loop
//!                                                                 iteration /
//!                                                                 sub-agent
//!                                                                 terminate
//! ```
//!
//! Work that must happen later (the next loop iteration, terminating a
//! sub-agent after its report) goes through a deferred queue drained by a
//! controller task, so pump tasks never start subprocesses themselves.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::events::PoolEvent;
use super::invocation::{CliConfig, InvocationParams};
use super::locks::WorkforceLocks;
use super::loop_state::{LoopConfig, LoopEndReason, LoopStatus, LoopStep};
use super::monitor::{PsProbe, ResourceProbe, DEFAULT_MONITOR_INTERVAL_MS};
use super::parser::{ParserEvent, StreamParser};
use super::shell_env::resolve_shell_path;
use super::spawner::{ProcessOutput, ProcessSpawner, PtySpawner};
use super::types::{
    edited_path, AgentProcess, AgentSnapshot, AgentStatus, CompletionReport, Persona,
    MAIN_AGENT_ID,
};
use crate::types::{HistoryEntry, TokenUsage};

/// Error type for pool operations.
///
/// Spawn failures are not errors here; they surface as an `error` status and
/// an [`PoolEvent::Error`] event.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Pool is not ready; spawn the main agent first")]
    NotReady,

    #[error("Invalid loop: {0}")]
    InvalidLoop(String),
}

/// Timing knobs for a pool.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Delay between a sub-agent's report and its termination.
    pub report_grace: Duration,
    /// Delay before the next loop iteration.
    pub loop_delay: Duration,
    /// Resource sampling interval.
    pub monitor_interval: Duration,
    /// Broadcast channel capacity.
    pub event_capacity: usize,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            report_grace: Duration::from_millis(1_000),
            loop_delay: Duration::from_millis(1_000),
            monitor_interval: Duration::from_millis(DEFAULT_MONITOR_INTERVAL_MS),
            event_capacity: 1_024,
        }
    }
}

impl PoolOptions {
    pub fn with_report_grace(mut self, grace: Duration) -> Self {
        self.report_grace = grace;
        self
    }

    pub fn with_loop_delay(mut self, delay: Duration) -> Self {
        self.loop_delay = delay;
        self
    }

    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }
}

#[derive(Debug)]
enum Deferred {
    NextIteration { generation: u64, iteration: u32 },
    Terminate { agent_id: String, run_id: u64 },
}

#[derive(Debug, Default)]
struct LoopSlot {
    generation: u64,
    config: Option<LoopConfig>,
}

struct PoolInner {
    config: RwLock<CliConfig>,
    options: PoolOptions,
    agents: RwLock<HashMap<String, AgentProcess>>,
    spawner: Arc<dyn ProcessSpawner>,
    probe: Arc<dyn ResourceProbe>,
    locks: Arc<WorkforceLocks>,
    events: broadcast::Sender<PoolEvent>,
    deferred: mpsc::UnboundedSender<(Duration, Deferred)>,
    ready: AtomicBool,
    brave_mode: AtomicBool,
    // Lock order: `loop_slot` before `agents`.
    loop_slot: Mutex<LoopSlot>,
}

/// Builder for [`AgentPool`].
pub struct AgentPoolBuilder {
    config: CliConfig,
    options: PoolOptions,
    spawner: Option<Arc<dyn ProcessSpawner>>,
    probe: Option<Arc<dyn ResourceProbe>>,
    locks: Option<WorkforceLocks>,
}

impl AgentPoolBuilder {
    pub fn with_options(mut self, options: PoolOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn ProcessSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_locks(mut self, locks: WorkforceLocks) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Build the pool. Must be called inside a Tokio runtime.
    pub fn build(self) -> AgentPool {
        let locks = self
            .locks
            .unwrap_or_else(|| WorkforceLocks::new(&self.config.working_dir));
        let (events, _) = broadcast::channel(self.options.event_capacity.max(16));
        let (deferred, deferred_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(PoolInner {
            config: RwLock::new(self.config),
            options: self.options,
            agents: RwLock::new(HashMap::new()),
            spawner: self.spawner.unwrap_or_else(|| Arc::new(PtySpawner::default())),
            probe: self.probe.unwrap_or_else(|| Arc::new(PsProbe)),
            locks: Arc::new(locks),
            events,
            deferred,
            ready: AtomicBool::new(false),
            brave_mode: AtomicBool::new(false),
            loop_slot: Mutex::new(LoopSlot::default()),
        });

        tokio::spawn(run_controller(Arc::downgrade(&inner), deferred_rx));
        AgentPool { inner }
    }
}

/// Pool of coding-agent subprocesses for one project.
#[derive(Clone)]
pub struct AgentPool {
    inner: Arc<PoolInner>,
}

impl AgentPool {
    /// Pool with the pseudo-terminal spawner, `ps` probe and project locks.
    pub fn new(config: CliConfig, options: PoolOptions) -> Self {
        Self::builder(config).with_options(options).build()
    }

    pub fn builder(config: CliConfig) -> AgentPoolBuilder {
        AgentPoolBuilder {
            config,
            options: PoolOptions::default(),
            spawner: None,
            probe: None,
            locks: None,
        }
    }

    /// Subscribe to pool events.
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.inner.events.subscribe()
    }

    /// Mark the pool ready and optionally send the first main-agent prompt.
    #[instrument(skip(self, initial_prompt))]
    pub async fn spawn_main(
        &self,
        brave_mode: bool,
        initial_prompt: Option<String>,
    ) -> Result<(), PoolError> {
        self.inner.spawn_main(brave_mode, initial_prompt).await
    }

    /// Create a sub-agent and send it `task`. Returns the new agent id.
    #[instrument(skip(self, persona, task), fields(persona = %persona.name))]
    pub async fn spawn_agent(
        &self,
        persona: Persona,
        task: &str,
        working_dir: Option<PathBuf>,
    ) -> Result<String, PoolError> {
        self.inner.spawn_agent(persona, task, working_dir).await
    }

    /// Start a new subprocess for `agent_id` carrying `prompt`.
    ///
    /// Any previous subprocess for the agent is killed first. Unknown ids
    /// create a new agent record. Spawn failures are reported through events.
    #[instrument(skip(self, prompt), fields(prompt_len = prompt.len()))]
    pub async fn send_message(&self, agent_id: &str, prompt: &str) -> Result<(), PoolError> {
        self.inner.send_message(agent_id, prompt).await
    }

    /// Kill the agent's subprocess, release its locks and drop its record.
    #[instrument(skip(self))]
    pub async fn terminate_agent(&self, agent_id: &str) -> Result<(), PoolError> {
        self.inner.terminate_agent(agent_id).await
    }

    /// Terminate every agent and leave the pool not ready.
    #[instrument(skip(self))]
    pub async fn kill_all(&self) {
        self.inner.kill_all().await
    }

    /// Repeat `prompt` on the main agent until `completion_promise` appears.
    #[instrument(skip(self, prompt))]
    pub async fn start_loop(
        &self,
        prompt: &str,
        completion_promise: &str,
        max_iterations: u32,
    ) -> Result<(), PoolError> {
        self.inner
            .start_loop(prompt, completion_promise, max_iterations)
            .await
    }

    /// Cancel the running loop. Returns false when no loop was running.
    pub async fn cancel_loop(&self) -> bool {
        self.inner.end_loop(LoopEndReason::Cancelled).await
    }

    pub async fn loop_status(&self) -> Option<LoopStatus> {
        self.inner
            .loop_slot
            .lock()
            .await
            .config
            .as_ref()
            .map(LoopConfig::status)
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }

    pub async fn status(&self, agent_id: &str) -> Option<AgentStatus> {
        self.inner.agents.read().await.get(agent_id).map(|a| a.status)
    }

    /// Ids of every live agent, sorted.
    pub async fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.agents.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn snapshot(&self, agent_id: &str) -> Option<AgentSnapshot> {
        self.inner
            .agents
            .read()
            .await
            .get(agent_id)
            .map(AgentProcess::snapshot)
    }

    pub fn locks(&self) -> &WorkforceLocks {
        &self.inner.locks
    }

    pub async fn cli_config(&self) -> CliConfig {
        self.inner.config.read().await.clone()
    }

    pub async fn set_model(&self, model: Option<String>) {
        self.inner.config.write().await.set_model(model);
    }

    pub async fn set_allowed_tools(&self, tools: Vec<String>) {
        self.inner.config.write().await.set_allowed_tools(tools);
    }

    pub async fn set_disallowed_tools(&self, tools: Vec<String>) {
        self.inner.config.write().await.set_disallowed_tools(tools);
    }

    pub async fn set_max_budget(&self, usd: Option<f64>) {
        self.inner.config.write().await.set_max_budget(usd);
    }

    pub async fn set_mcp_config(&self, path: Option<PathBuf>) {
        self.inner.config.write().await.set_mcp_config(path);
    }

    pub async fn set_additional_dirs(&self, dirs: Vec<PathBuf>) {
        self.inner.config.write().await.set_additional_dirs(dirs);
    }
}

/// Drain the deferred queue, running each action after its delay.
async fn run_controller(
    pool: Weak<PoolInner>,
    mut rx: mpsc::UnboundedReceiver<(Duration, Deferred)>,
) {
    while let Some((delay, action)) = rx.recv().await {
        let pool = pool.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = pool.upgrade() {
                inner.run_deferred(action).await;
            }
        });
    }
}

impl PoolInner {
    fn emit(&self, event: PoolEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn defer(&self, delay: Duration, action: Deferred) {
        if self.deferred.send((delay, action)).is_err() {
            warn!("Deferred queue closed");
        }
    }

    fn ensure_ready(&self) -> Result<(), PoolError> {
        if self.ready.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PoolError::NotReady)
        }
    }

    async fn spawn_main(
        self: &Arc<Self>,
        brave_mode: bool,
        initial_prompt: Option<String>,
    ) -> Result<(), PoolError> {
        // Resolve the login-shell PATH off the runtime before any dispatch.
        if !self.config.read().await.has_env("PATH") {
            match tokio::task::spawn_blocking(resolve_shell_path).await {
                Ok(path) => {
                    self.config.write().await.env.push(("PATH".to_string(), path));
                }
                Err(e) => warn!("Failed to resolve shell PATH: {}", e),
            }
        }

        self.brave_mode.store(brave_mode, Ordering::SeqCst);
        self.ready.store(true, Ordering::SeqCst);

        let working_dir = self.config.read().await.working_dir.clone();
        {
            let mut agents = self.agents.write().await;
            agents
                .entry(MAIN_AGENT_ID.to_string())
                .or_insert_with(|| {
                    AgentProcess::new(MAIN_AGENT_ID, Persona::default(), "", working_dir)
                })
                .brave = brave_mode;
        }
        self.locks.register_agent(MAIN_AGENT_ID);

        info!(brave_mode, "Agent pool ready");
        self.emit(PoolEvent::Ready { brave_mode });

        match initial_prompt.filter(|p| !p.trim().is_empty()) {
            Some(prompt) => self.send_message(MAIN_AGENT_ID, &prompt).await,
            None => Ok(()),
        }
    }

    async fn spawn_agent(
        self: &Arc<Self>,
        persona: Persona,
        task: &str,
        working_dir: Option<PathBuf>,
    ) -> Result<String, PoolError> {
        self.ensure_ready()?;

        let simple = uuid::Uuid::new_v4().simple().to_string();
        let agent_id = format!("agent-{}", &simple[..8]);
        let working_dir = match working_dir {
            Some(dir) => dir,
            None => self.config.read().await.working_dir.clone(),
        };

        info!(agent_id = %agent_id, persona = %persona.name, "Spawning sub-agent");
        let agent = AgentProcess::new(&agent_id, persona, task, working_dir).with_brave(true);
        self.agents.write().await.insert(agent_id.clone(), agent);
        self.locks.register_agent(&agent_id);
        self.emit(PoolEvent::StatusChanged {
            agent_id: agent_id.clone(),
            status: AgentStatus::Idle,
        });

        self.send_message(&agent_id, task).await?;
        Ok(agent_id)
    }

    async fn send_message(self: &Arc<Self>, agent_id: &str, prompt: &str) -> Result<(), PoolError> {
        self.ensure_ready()?;

        if agent_id != MAIN_AGENT_ID {
            self.dispatch(agent_id, prompt, None).await;
            return Ok(());
        }

        let promise = {
            let slot = self.loop_slot.lock().await;
            slot.config
                .as_ref()
                .filter(|c| c.active)
                .map(|c| c.completion_promise.clone())
        };
        if !self.dispatch(agent_id, prompt, promise).await {
            self.end_loop(LoopEndReason::Cancelled).await;
        }
        Ok(())
    }

    /// Kill the agent's current subprocess and launch a new one.
    ///
    /// Returns whether the subprocess started.
    async fn dispatch(
        self: &Arc<Self>,
        agent_id: &str,
        prompt: &str,
        promise: Option<String>,
    ) -> bool {
        let config = self.config.read().await.clone();
        let brave_mode = self.brave_mode.load(Ordering::SeqCst);

        let mut agents = self.agents.write().await;
        let agent = agents.entry(agent_id.to_string()).or_insert_with(|| {
            debug!(agent_id, "Creating agent record on first message");
            self.locks.register_agent(agent_id);
            AgentProcess::new(agent_id, Persona::default(), prompt, config.working_dir.clone())
        });

        if let Some(e) = agent.kill_process() {
            warn!(agent_id, "Failed to kill previous agent process: {}", e);
        }
        agent.run_id += 1;
        let run_id = agent.run_id;
        let first_message = agent.is_first_message();
        agent.brave = agent_id != MAIN_AGENT_ID || brave_mode;
        agent.message_history.push(HistoryEntry::user(prompt));

        let request = config.build_invocation(InvocationParams {
            agent_id,
            prompt,
            first_message,
            brave: agent.brave,
            persona: &agent.persona,
            working_dir: Some(&agent.context.working_dir),
        });
        debug!(agent_id, run_id, first_message, args = ?request.args, "Launching agent process");

        match self.spawner.spawn(request) {
            Ok(process) => {
                agent.pid = process.pid;
                agent.killer = Some(process.killer);
                agent.status = AgentStatus::Active;
                if !agent.monitor_running() {
                    agent.monitor = Some(self.start_monitor(agent_id));
                }
                drop(agents);

                info!(agent_id, run_id, pid = ?process.pid, "Agent process started");
                self.locks.update_status(agent_id, AgentStatus::Active.as_str());
                self.emit(PoolEvent::StatusChanged {
                    agent_id: agent_id.to_string(),
                    status: AgentStatus::Active,
                });

                let mut parser = StreamParser::new();
                if let Some(pattern) = promise {
                    parser.set_promise_pattern(pattern);
                }
                let pump = Arc::clone(self).pump(
                    agent_id.to_string(),
                    run_id,
                    process.output,
                    parser,
                );
                tokio::spawn(pump);
                true
            }
            Err(e) => {
                agent.status = AgentStatus::Error;
                agent.stop_monitor();
                drop(agents);

                error!(agent_id, "Failed to spawn agent process: {}", e);
                self.locks.update_status(agent_id, AgentStatus::Error.as_str());
                self.emit(PoolEvent::StatusChanged {
                    agent_id: agent_id.to_string(),
                    status: AgentStatus::Error,
                });
                self.emit(PoolEvent::Error {
                    agent_id: agent_id.to_string(),
                    error_type: e.kind().to_string(),
                    message: e.to_string(),
                });
                false
            }
        }
    }

    /// Feed one subprocess's output through its parser until it exits.
    async fn pump(
        self: Arc<Self>,
        agent_id: String,
        run_id: u64,
        mut output: mpsc::UnboundedReceiver<ProcessOutput>,
        mut parser: StreamParser,
    ) {
        let mut completed = false;
        let code = loop {
            match output.recv().await {
                Some(ProcessOutput::Data(bytes)) => {
                    for event in parser.feed(&bytes) {
                        completed |= self.handle_parser_event(&agent_id, run_id, event).await;
                    }
                }
                Some(ProcessOutput::Exited { code }) => break code,
                None => break None,
            }
        };
        for event in parser.flush() {
            completed |= self.handle_parser_event(&agent_id, run_id, event).await;
        }
        self.handle_exit(&agent_id, run_id, code, completed).await;
    }

    async fn is_current(&self, agent_id: &str, run_id: u64) -> bool {
        self.agents
            .read()
            .await
            .get(agent_id)
            .is_some_and(|a| a.run_id == run_id)
    }

    /// Returns true for a completion event.
    async fn handle_parser_event(&self, agent_id: &str, run_id: u64, event: ParserEvent) -> bool {
        if !self.is_current(agent_id, run_id).await {
            return false;
        }

        let agent = agent_id.to_string();
        match event {
            ParserEvent::Text { delta, accumulated } => {
                self.emit(PoolEvent::Text {
                    agent_id: agent,
                    delta,
                    accumulated,
                });
            }
            ParserEvent::ToolUse { id, name, input } => {
                let path = edited_path(&name, &input).map(str::to_string);
                self.emit(PoolEvent::ToolUse {
                    agent_id: agent,
                    id,
                    name,
                    input,
                });
                if let Some(path) = path {
                    self.claim_file(agent_id, &path).await;
                }
            }
            ParserEvent::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                self.emit(PoolEvent::ToolResult {
                    agent_id: agent,
                    tool_use_id,
                    content,
                    is_error,
                });
            }
            ParserEvent::Error {
                error_type,
                message,
            } => {
                warn!(agent_id, error_type = %error_type, "Agent reported error: {}", message);
                self.emit(PoolEvent::Error {
                    agent_id: agent,
                    error_type,
                    message,
                });
            }
            ParserEvent::PromiseDetected { pattern } => {
                info!(agent_id, pattern = %pattern, "Completion promise detected");
                self.emit(PoolEvent::PromiseDetected {
                    agent_id: agent,
                    pattern,
                });
                if agent_id == MAIN_AGENT_ID {
                    self.end_loop(LoopEndReason::Promise).await;
                }
            }
            ParserEvent::Complete {
                result,
                usage,
                cost_usd,
                session_id,
                is_error,
            } => {
                self.handle_complete(
                    agent_id, run_id, result, usage, cost_usd, session_id, is_error,
                )
                .await;
                return true;
            }
        }
        false
    }

    async fn claim_file(&self, agent_id: &str, path: &str) {
        if self.locks.lock_file(agent_id, path) {
            let locked = self.locks.locked_files(agent_id);
            if let Some(agent) = self.agents.write().await.get_mut(agent_id) {
                agent.files_modified.insert(path.to_string());
                agent.context.locked_files = locked;
            }
            return;
        }

        let holder = self.locks.is_locked(path).holder;
        warn!(agent_id, path, holder = ?holder, "File is locked by another agent");
        self.emit(PoolEvent::LockConflict {
            agent_id: agent_id.to_string(),
            path: path.to_string(),
            holder,
        });
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_complete(
        &self,
        agent_id: &str,
        run_id: u64,
        result: String,
        usage: TokenUsage,
        cost_usd: Option<f64>,
        session_id: Option<String>,
        is_error: bool,
    ) {
        let report = {
            let mut agents = self.agents.write().await;
            let Some(agent) = agents.get_mut(agent_id) else {
                return;
            };
            agent.usage.accumulate(&usage);
            agent.message_history.push(HistoryEntry::assistant(&result));

            if agent_id == MAIN_AGENT_ID {
                None
            } else {
                let report = CompletionReport {
                    result: result.clone(),
                    usage: agent.usage,
                    files_modified: agent.files_modified.iter().cloned().collect(),
                    duration_ms: agent.elapsed_ms(),
                };
                agent.completion_report = Some(report.clone());
                Some(report)
            }
        };

        debug!(agent_id, tokens = usage.total(), ?cost_usd, "Agent turn complete");
        self.emit(PoolEvent::Complete {
            agent_id: agent_id.to_string(),
            result,
            usage,
            cost_usd,
            session_id,
            is_error,
        });

        match report {
            Some(report) => {
                info!(agent_id, files = report.files_modified.len(), "Sub-agent reported");
                self.emit(PoolEvent::AgentReport {
                    agent_id: agent_id.to_string(),
                    report,
                });
                self.defer(
                    self.options.report_grace,
                    Deferred::Terminate {
                        agent_id: agent_id.to_string(),
                        run_id,
                    },
                );
            }
            None => self.advance_loop().await,
        }
    }

    async fn handle_exit(&self, agent_id: &str, run_id: u64, code: Option<u32>, completed: bool) {
        let status = match code {
            Some(0) => AgentStatus::Complete,
            _ => AgentStatus::Error,
        };
        {
            let mut agents = self.agents.write().await;
            let Some(agent) = agents.get_mut(agent_id) else {
                return;
            };
            if agent.run_id != run_id {
                debug!(agent_id, run_id, "Ignoring exit of superseded process");
                return;
            }
            agent.pid = None;
            agent.killer = None;
            agent.stop_monitor();
            agent.status = status;
        }

        info!(agent_id, ?code, status = %status, "Agent process finished");
        self.locks.update_status(agent_id, status.as_str());
        self.emit(PoolEvent::StatusChanged {
            agent_id: agent_id.to_string(),
            status,
        });
        if status == AgentStatus::Error {
            let message = match code {
                Some(code) => format!("Agent process exited with code {}", code),
                None => "Agent process exited without a status".to_string(),
            };
            self.emit(PoolEvent::Error {
                agent_id: agent_id.to_string(),
                error_type: "process_exit".to_string(),
                message,
            });
        }

        // A loop iteration that never completed cannot advance.
        if agent_id == MAIN_AGENT_ID && !completed {
            self.end_loop(LoopEndReason::Cancelled).await;
        }
    }

    fn start_monitor(self: &Arc<Self>, agent_id: &str) -> JoinHandle<()> {
        let pool = Arc::downgrade(self);
        let agent_id = agent_id.to_string();
        let period = self.options.monitor_interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(inner) = pool.upgrade() else {
                    break;
                };
                let pid = inner.agents.read().await.get(&agent_id).and_then(|a| a.pid);
                let Some(pid) = pid else {
                    break;
                };
                match inner.probe.sample(pid).await {
                    Some(sample) => inner.emit(PoolEvent::ResourceUsage {
                        agent_id: agent_id.clone(),
                        cpu_percent: sample.cpu_percent,
                        memory_mb: sample.memory_mb,
                    }),
                    None => {
                        debug!(agent_id = %agent_id, pid, "Process gone, stopping monitor");
                        break;
                    }
                }
            }
        })
    }

    async fn terminate_agent(&self, agent_id: &str) -> Result<(), PoolError> {
        let removed = self.agents.write().await.remove(agent_id);
        let Some(mut agent) = removed else {
            return Err(PoolError::AgentNotFound(agent_id.to_string()));
        };

        if let Some(e) = agent.kill_process() {
            warn!(agent_id, "Failed to kill agent process: {}", e);
        }
        agent.stop_monitor();
        self.locks.unlock_all(agent_id);
        self.locks.unregister_agent(agent_id);

        info!(agent_id, "Agent terminated");
        self.emit(PoolEvent::AgentTerminated {
            agent_id: agent_id.to_string(),
        });

        if agent_id == MAIN_AGENT_ID {
            self.end_loop(LoopEndReason::Cancelled).await;
        }
        Ok(())
    }

    async fn kill_all(&self) {
        self.end_loop(LoopEndReason::Cancelled).await;
        let ids: Vec<String> = self.agents.read().await.keys().cloned().collect();
        for id in ids {
            // Already gone if a deferred terminate got there first.
            let _ = self.terminate_agent(&id).await;
        }
        self.ready.store(false, Ordering::SeqCst);
    }

    async fn start_loop(
        self: &Arc<Self>,
        prompt: &str,
        completion_promise: &str,
        max_iterations: u32,
    ) -> Result<(), PoolError> {
        self.ensure_ready()?;
        let config = LoopConfig::new(prompt, completion_promise, max_iterations)?;

        let mut slot = self.loop_slot.lock().await;
        if let Some(mut previous) = slot.config.take() {
            if let Some(reason) = previous.finish(LoopEndReason::Cancelled) {
                self.emit_loop_complete(reason, &previous);
            }
        }
        slot.generation += 1;

        let prompt = config.prompt.clone();
        let promise = config.completion_promise.clone();
        let max = config.max_iterations;
        slot.config = Some(config);

        info!(max_iterations = max, promise = %promise, "Starting loop");
        self.emit(PoolEvent::LoopIteration {
            iteration: 1,
            max_iterations: max,
        });

        if !self.dispatch(MAIN_AGENT_ID, &prompt, Some(promise)).await {
            self.finish_loop_locked(&mut slot, LoopEndReason::Cancelled);
        }
        Ok(())
    }

    async fn advance_loop(&self) {
        let mut slot = self.loop_slot.lock().await;
        let generation = slot.generation;
        let Some(config) = slot.config.as_mut().filter(|c| c.active) else {
            return;
        };

        match config.advance() {
            LoopStep::Next(iteration) => {
                debug!(iteration, "Scheduling next loop iteration");
                self.defer(
                    self.options.loop_delay,
                    Deferred::NextIteration {
                        generation,
                        iteration,
                    },
                );
            }
            LoopStep::End(reason) => {
                if let Some(config) = slot.config.take() {
                    self.emit_loop_complete(reason, &config);
                }
            }
        }
    }

    /// End the running loop with `reason`. Returns false when none was running.
    async fn end_loop(&self, reason: LoopEndReason) -> bool {
        let mut slot = self.loop_slot.lock().await;
        self.finish_loop_locked(&mut slot, reason)
    }

    fn finish_loop_locked(&self, slot: &mut LoopSlot, reason: LoopEndReason) -> bool {
        let Some(mut config) = slot.config.take() else {
            return false;
        };
        match config.finish(reason) {
            Some(reason) => {
                self.emit_loop_complete(reason, &config);
                true
            }
            None => false,
        }
    }

    fn emit_loop_complete(&self, reason: LoopEndReason, config: &LoopConfig) {
        info!(reason = %reason, iterations = config.current_iteration, "Loop finished");
        self.emit(PoolEvent::LoopComplete {
            reason,
            iterations: config.current_iteration,
            max_iterations: config.max_iterations,
        });
    }

    async fn run_deferred(self: Arc<Self>, action: Deferred) {
        match action {
            Deferred::NextIteration {
                generation,
                iteration,
            } => {
                let mut slot = self.loop_slot.lock().await;
                let (prompt, promise, max) = match &slot.config {
                    Some(c)
                        if slot.generation == generation
                            && c.active
                            && c.current_iteration == iteration =>
                    {
                        (c.prompt.clone(), c.completion_promise.clone(), c.max_iterations)
                    }
                    _ => {
                        debug!(iteration, "Loop iteration no longer wanted");
                        return;
                    }
                };

                self.emit(PoolEvent::LoopIteration {
                    iteration,
                    max_iterations: max,
                });
                if !self.dispatch(MAIN_AGENT_ID, &prompt, Some(promise)).await {
                    self.finish_loop_locked(&mut slot, LoopEndReason::Cancelled);
                }
            }
            Deferred::Terminate { agent_id, run_id } => {
                if !self.is_current(&agent_id, run_id).await {
                    debug!(agent_id = %agent_id, "Agent revived or gone, skipping terminate");
                    return;
                }
                if let Err(e) = self.terminate_agent(&agent_id).await {
                    debug!(agent_id = %agent_id, "Deferred terminate skipped: {}", e);
                }
            }
        }
    }
}
