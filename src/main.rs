// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Workforce main entry point - CLI and event rendering.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::sync::broadcast::error::RecvError;

use workforce::config::{self, CliOptions, ConfigFormat, ResolvedConfig};
use workforce::models::{CliModelLister, ModelCache, LIST_TIMEOUT};
use workforce::orchestrate::{AgentPool, AgentStatus, PoolEvent, WorkforceLocks, MAIN_AGENT_ID};
use workforce::telemetry::{init_telemetry, TelemetryConfig};
use workforce::VERSION;

/// Workforce - run coding agents as a coordinated pool.
#[derive(Parser)]
#[command(name = "workforce")]
#[command(author, version, about = "Run coding agents as a coordinated pool", long_about = None)]
struct Cli {
    /// Agent executable (name on PATH or explicit path)
    #[arg(long, env = "WORKFORCE_EXECUTABLE", global = true)]
    executable: Option<String>,

    /// Model to use
    #[arg(short, long, env = "WORKFORCE_MODEL", global = true)]
    model: Option<String>,

    /// Skip permission prompts for the main agent
    #[arg(long, global = true)]
    brave: bool,

    /// Spending cap per invocation, in USD
    #[arg(long, global = true)]
    max_budget: Option<f64>,

    /// MCP server configuration file
    #[arg(long, global = true)]
    mcp_config: Option<String>,

    /// Extra directory the agents may access (repeatable)
    #[arg(long = "add-dir", global = true)]
    add_dirs: Vec<String>,

    /// Tools the agents may use (comma separated, `*` for all)
    #[arg(long, value_delimiter = ',', global = true)]
    allowed_tools: Option<Vec<String>>,

    /// Tools the agents may not use (comma separated)
    #[arg(long, value_delimiter = ',', global = true)]
    disallowed_tools: Option<Vec<String>>,

    /// Print events as JSON lines instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one prompt to the main agent and stream its output
    Run {
        prompt: String,
    },

    /// Repeat a prompt on the main agent until it prints a completion promise
    Loop {
        prompt: String,
        /// Text that ends the loop when it appears in the output
        #[arg(short, long)]
        promise: String,
        /// Iteration cap (defaults to loopMaxIterations from config)
        #[arg(long)]
        max_iterations: Option<u32>,
    },

    /// Run a task on a sub-agent and print its completion report
    Spawn {
        task: String,
        /// Persona name from the `personas` config map
        #[arg(short, long, default_value = "worker")]
        persona: String,
        /// Working directory for the sub-agent
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// List available models
    Models {
        /// Query the agent CLI now instead of using the cache
        #[arg(long)]
        refresh: bool,
    },

    /// Show the project's file locks
    Locks,

    /// Release file locks held by an agent
    Unlock {
        agent_id: String,
        /// Single file to release; all of the agent's files when omitted
        path: Option<String>,
    },

    /// Show configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Initialize a new configuration file
    Init {
        /// Write the example configuration instead of an empty one
        #[arg(long)]
        example: bool,
        /// Write YAML instead of JSON
        #[arg(long)]
        yaml: bool,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_telemetry(&TelemetryConfig::from_verbosity(cli.verbose))?;

    let cli_options = CliOptions {
        executable: cli.executable.clone(),
        model: cli.model.clone(),
        brave_mode: cli.brave.then_some(true),
        max_budget_usd: cli.max_budget,
        mcp_config: cli.mcp_config.clone(),
        additional_dirs: cli.add_dirs.clone(),
        allowed_tools: cli.allowed_tools.clone(),
        disallowed_tools: cli.disallowed_tools.clone(),
    };

    let cwd = std::env::current_dir()?;
    let workspace_root = config::find_workspace_root(&cwd).unwrap_or(cwd);

    match cli.command {
        Commands::Run { prompt } => {
            let config = config::load_config(&workspace_root, cli_options)?;
            run_prompt(&config, &workspace_root, &prompt, cli.json).await
        }
        Commands::Loop {
            prompt,
            promise,
            max_iterations,
        } => {
            let config = config::load_config(&workspace_root, cli_options)?;
            let max = max_iterations.unwrap_or(config.loop_max_iterations);
            run_loop(&config, &workspace_root, &prompt, &promise, max, cli.json).await
        }
        Commands::Spawn { task, persona, dir } => {
            let config = config::load_config(&workspace_root, cli_options)?;
            run_sub_agent(&config, &workspace_root, &task, &persona, dir, cli.json).await
        }
        Commands::Models { refresh } => {
            let config = config::load_config(&workspace_root, cli_options)?;
            show_models(&config, refresh, cli.json).await
        }
        Commands::Locks => show_locks(&workspace_root, cli.json),
        Commands::Unlock { agent_id, path } => {
            let locks = WorkforceLocks::new(&workspace_root);
            match path {
                Some(path) => {
                    locks.unlock_file(&agent_id, &path);
                    println!("Released {} from {}", path.bright_white(), agent_id.cyan());
                }
                None => {
                    locks.unlock_all(&agent_id);
                    println!("Released all files held by {}", agent_id.cyan());
                }
            }
            Ok(())
        }
        Commands::Config { action } => match action {
            Some(ConfigAction::Show) | None => {
                let config = config::load_config(&workspace_root, cli_options)?;
                for source in config::config_sources(&workspace_root) {
                    eprintln!("{} {}", "source:".dimmed(), source.display());
                }
                println!("{}", serde_json::to_string_pretty(&config)?);
                Ok(())
            }
        },
        Commands::Init { example, yaml } => {
            let contents = example.then(config::get_example_config);
            let format = if yaml { ConfigFormat::Yaml } else { ConfigFormat::Json };
            let path = config::init_config(&workspace_root, contents, format)?;
            println!("Created config file: {}", path.display());
            Ok(())
        }
        Commands::Version => {
            println!("workforce {}", VERSION);
            Ok(())
        }
    }
}

fn build_pool(config: &ResolvedConfig, workspace_root: &Path) -> AgentPool {
    AgentPool::new(config.cli_config(workspace_root), config.pool_options())
}

async fn run_prompt(
    config: &ResolvedConfig,
    workspace_root: &Path,
    prompt: &str,
    json: bool,
) -> anyhow::Result<()> {
    let pool = build_pool(config, workspace_root);
    let mut events = pool.subscribe();
    pool.spawn_main(config.brave_mode, Some(prompt.to_string())).await?;

    drive(&pool, &mut events, json, |event| {
        matches!(
            event,
            PoolEvent::StatusChanged { agent_id, status }
                if agent_id == MAIN_AGENT_ID && !status.is_active()
        )
    })
    .await;
    pool.kill_all().await;
    Ok(())
}

async fn run_loop(
    config: &ResolvedConfig,
    workspace_root: &Path,
    prompt: &str,
    promise: &str,
    max_iterations: u32,
    json: bool,
) -> anyhow::Result<()> {
    let pool = build_pool(config, workspace_root);
    let mut events = pool.subscribe();
    pool.spawn_main(config.brave_mode, None).await?;
    pool.start_loop(prompt, promise, max_iterations).await?;

    drive(&pool, &mut events, json, |event| {
        matches!(event, PoolEvent::LoopComplete { .. })
    })
    .await;
    pool.kill_all().await;
    Ok(())
}

async fn run_sub_agent(
    config: &ResolvedConfig,
    workspace_root: &Path,
    task: &str,
    persona: &str,
    dir: Option<PathBuf>,
    json: bool,
) -> anyhow::Result<()> {
    let pool = build_pool(config, workspace_root);
    let mut events = pool.subscribe();
    pool.spawn_main(config.brave_mode, None).await?;
    let agent_id = pool.spawn_agent(config.persona(persona), task, dir).await?;
    if !json {
        println!("{} {}", "Spawned".green(), agent_id.cyan());
    }

    drive(&pool, &mut events, json, |event| match event {
        PoolEvent::AgentTerminated { agent_id: id } => *id == agent_id,
        PoolEvent::StatusChanged { agent_id: id, status } => {
            *id == agent_id && *status == AgentStatus::Error
        }
        _ => false,
    })
    .await;
    pool.kill_all().await;
    Ok(())
}

/// Render events until `done` matches one or Ctrl-C is pressed.
async fn drive<F>(
    pool: &AgentPool,
    events: &mut tokio::sync::broadcast::Receiver<PoolEvent>,
    json: bool,
    done: F,
) where
    F: Fn(&PoolEvent) -> bool,
{
    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => {
                    render_event(&event, json);
                    if done(&event) {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event output fell behind");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n{}", "Interrupted, stopping agents".yellow());
                pool.cancel_loop().await;
                break;
            }
        }
    }
    if !json {
        println!();
    }
}

fn render_event(event: &PoolEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!("Failed to serialize event: {}", e),
        }
        return;
    }

    match event {
        PoolEvent::Text { delta, .. } => {
            print!("{}", delta);
            let _ = std::io::stdout().flush();
        }
        PoolEvent::ToolUse { agent_id, name, .. } => {
            println!("\n{} {} {}", "⚙".cyan(), agent_id.dimmed(), name.bright_white());
        }
        PoolEvent::ToolResult { is_error: true, content, .. } => {
            println!("{} {}", "✗".red(), first_line(content).red());
        }
        PoolEvent::ToolResult { .. } => {}
        PoolEvent::Complete { agent_id, usage, cost_usd, is_error, .. } => {
            let cost = cost_usd.map(|c| format!(", ${:.4}", c)).unwrap_or_default();
            let summary = format!(
                "{} done: {} in / {} out tokens{}",
                agent_id, usage.input_tokens, usage.output_tokens, cost
            );
            if *is_error {
                println!("\n{}", summary.red());
            } else {
                println!("\n{}", summary.dimmed());
            }
        }
        PoolEvent::Error { agent_id, error_type, message } => {
            eprintln!("{} {} [{}] {}", "error".red().bold(), agent_id, error_type, message);
        }
        PoolEvent::PromiseDetected { pattern, .. } => {
            println!("\n{} {}", "Promise detected:".green().bold(), pattern);
        }
        PoolEvent::AgentReport { agent_id, report } => {
            println!("\n{} {}", "Report from".bright_blue().bold(), agent_id.cyan());
            println!("{}", report.result);
            if !report.files_modified.is_empty() {
                println!("{}", "Files modified:".bright_white());
                for file in &report.files_modified {
                    println!("  {}", file);
                }
            }
            println!(
                "{}",
                format!("{} tokens in {} ms", report.usage.total(), report.duration_ms).dimmed()
            );
        }
        PoolEvent::LockConflict { agent_id, path, holder } => {
            let holder = holder.as_deref().unwrap_or("another agent");
            eprintln!(
                "{} {} wants {} (held by {})",
                "lock conflict".yellow().bold(),
                agent_id,
                path,
                holder
            );
        }
        PoolEvent::LoopIteration { iteration, max_iterations } => {
            println!(
                "\n{}",
                format!("── iteration {}/{} ──", iteration, max_iterations).bright_cyan()
            );
        }
        PoolEvent::LoopComplete { reason, iterations, .. } => {
            println!(
                "\n{} after {} iteration(s): {}",
                "Loop finished".bright_blue().bold(),
                iterations,
                reason
            );
        }
        PoolEvent::ResourceUsage { agent_id, cpu_percent, memory_mb } => {
            tracing::debug!(agent_id = %agent_id, cpu_percent, memory_mb, "Resource usage");
        }
        PoolEvent::Ready { .. }
        | PoolEvent::StatusChanged { .. }
        | PoolEvent::AgentTerminated { .. } => {
            tracing::debug!(?event, "Pool event");
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

async fn show_models(config: &ResolvedConfig, refresh: bool, json: bool) -> anyhow::Result<()> {
    let lister = CliModelLister::new(config.executable_path(), config.model_list_args.clone());
    let cache = ModelCache::in_home(Arc::new(lister))?;

    let models = if refresh {
        match cache.refresh_models().await? {
            Some(models) => models,
            None => cache.list_models().await,
        }
    } else {
        cache.list_models().await
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&models)?);
    } else {
        println!("{}", "Available models".bright_blue().bold());
        for model in &models {
            match &model.name {
                Some(name) => println!("  {} [{}]", name.bright_white(), model.id),
                None => println!("  {}", model.id.bright_white()),
            }
        }
    }

    // Let a background refresh finish so the next run sees fresh data.
    if cache.is_refreshing() {
        if !json {
            println!("{}", "Updating model cache...".dimmed());
        }
        let deadline = tokio::time::Instant::now() + LIST_TIMEOUT;
        while cache.is_refreshing() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }
    Ok(())
}

fn show_locks(workspace_root: &Path, json: bool) -> anyhow::Result<()> {
    let locks = WorkforceLocks::new(workspace_root);
    let document = locks.snapshot();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&document).context("Failed to serialize lock document")?
        );
        return Ok(());
    }

    if document.agents.is_empty() {
        println!("{}", "No agents hold locks".dimmed());
        return Ok(());
    }
    for (agent_id, entry) in &document.agents {
        println!("{} ({})", agent_id.cyan().bold(), entry.status);
        for file in &entry.locked_files {
            println!("  {}", file);
        }
    }
    Ok(())
}
