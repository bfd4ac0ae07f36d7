// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-message invocation of the coding-agent executable.
//!
//! There is no long-lived session with the agent. Every message starts a new
//! process, and conversation continuity comes from passing `--continue` on
//! every message after the first.
//!
//! Argument order:
//!
//! ```text
//! <exe> -p --output-format stream-json --verbose
//!       [--continue] [--dangerously-skip-permissions]
//!       [--model <id>] [--thinking] [--max-budget-usd <n>]
//!       [--mcp-config <path>] [--add-dir <path>]...
//!       [--disallowedTools <a,b>] [--allowedTools <a,b>]
//!       [--append-system-prompt <text>]
//!       <prompt>
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::shell_env::resolve_shell_path;
use super::spawner::SpawnRequest;
use super::types::Persona;

/// Default coding-agent executable.
pub const DEFAULT_EXECUTABLE: &str = "claude";

/// Print-mode flags passed on every invocation.
pub const BASE_ARGS: &[&str] = &["-p", "--output-format", "stream-json", "--verbose"];

pub const CONTINUE_FLAG: &str = "--continue";
pub const BRAVE_FLAG: &str = "--dangerously-skip-permissions";
pub const THINKING_FLAG: &str = "--thinking";

/// Model suffix that requests extended reasoning.
pub const THINKING_SUFFIX: &str = "-thinking";

/// Prompt prefixes that request extended reasoning.
pub const THINKING_PREFIXES: &[&str] =
    &["[ultrathink]", "[think harder]", "[think hard]", "[think]"];

/// Allow-list entries meaning "every tool".
const ALLOW_ALL: &[&str] = &["*", "all"];

/// Effective model after thinking-mode detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: Option<String>,
    pub thinking: bool,
}

/// Strip a `-thinking` model suffix and detect thinking prompt prefixes.
pub fn derive_model(model: Option<&str>, prompt: &str) -> ModelSelection {
    let mut thinking = false;
    let model = model.filter(|m| !m.is_empty()).map(|m| match m.strip_suffix(THINKING_SUFFIX) {
        Some(base) if !base.is_empty() => {
            thinking = true;
            base.to_string()
        }
        _ => m.to_string(),
    });

    let head = prompt.trim_start().to_lowercase();
    if THINKING_PREFIXES.iter().any(|p| head.starts_with(p)) {
        thinking = true;
    }

    ModelSelection { model, thinking }
}

fn allows_everything(tools: &[String]) -> bool {
    tools.iter().any(|t| ALLOW_ALL.contains(&t.trim()))
}

/// Invocation template shared by every agent in a pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    pub executable: PathBuf,
    pub base_args: Vec<String>,
    pub working_dir: PathBuf,
    /// Environment overrides. `PATH` is filled from the login shell when unset.
    pub env: Vec<(String, String)>,
    pub model: Option<String>,
    pub mcp_config: Option<PathBuf>,
    pub additional_dirs: Vec<PathBuf>,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    pub max_budget_usd: Option<f64>,
    /// `--mcp-config` and `--add-dir` arguments, rebuilt by the setters.
    #[serde(skip)]
    shared_args: Vec<String>,
}

/// Per-message inputs to [`CliConfig::build_invocation`].
#[derive(Debug, Clone, Copy)]
pub struct InvocationParams<'a> {
    pub agent_id: &'a str,
    pub prompt: &'a str,
    pub first_message: bool,
    pub brave: bool,
    pub persona: &'a Persona,
    pub working_dir: Option<&'a std::path::Path>,
}

impl CliConfig {
    pub fn new(executable: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self {
            executable: executable.into(),
            base_args: BASE_ARGS.iter().map(|s| s.to_string()).collect(),
            working_dir: working_dir.into(),
            env: Vec::new(),
            model: None,
            mcp_config: None,
            additional_dirs: Vec::new(),
            allowed_tools: Vec::new(),
            disallowed_tools: Vec::new(),
            max_budget_usd: None,
            shared_args: Vec::new(),
        };
        config.rebuild();
        config
    }

    /// Whether an environment override for `key` is set.
    pub fn has_env(&self, key: &str) -> bool {
        self.env.iter().any(|(k, _)| k == key)
    }

    /// Add an environment override.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.set_model(model);
        self
    }

    pub fn with_mcp_config(mut self, path: Option<PathBuf>) -> Self {
        self.set_mcp_config(path);
        self
    }

    pub fn with_additional_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.set_additional_dirs(dirs);
        self
    }

    pub fn with_tools(mut self, allowed: Vec<String>, disallowed: Vec<String>) -> Self {
        self.set_allowed_tools(allowed);
        self.set_disallowed_tools(disallowed);
        self
    }

    pub fn with_max_budget(mut self, usd: Option<f64>) -> Self {
        self.set_max_budget(usd);
        self
    }

    pub fn set_model(&mut self, model: Option<String>) {
        self.model = model.filter(|m| !m.is_empty());
        self.rebuild();
    }

    pub fn set_mcp_config(&mut self, path: Option<PathBuf>) {
        self.mcp_config = path;
        self.rebuild();
    }

    pub fn set_additional_dirs(&mut self, dirs: Vec<PathBuf>) {
        self.additional_dirs = dirs;
        self.rebuild();
    }

    pub fn set_allowed_tools(&mut self, tools: Vec<String>) {
        self.allowed_tools = tools;
        self.rebuild();
    }

    pub fn set_disallowed_tools(&mut self, tools: Vec<String>) {
        self.disallowed_tools = tools;
        self.rebuild();
    }

    pub fn set_max_budget(&mut self, usd: Option<f64>) {
        self.max_budget_usd = usd.filter(|v| *v > 0.0);
        self.rebuild();
    }

    /// Cached `--mcp-config`/`--add-dir` arguments.
    pub fn shared_args(&self) -> &[String] {
        &self.shared_args
    }

    fn rebuild(&mut self) {
        let mut args = Vec::new();
        if let Some(path) = &self.mcp_config {
            args.push("--mcp-config".to_string());
            args.push(path.display().to_string());
        }
        for dir in &self.additional_dirs {
            args.push("--add-dir".to_string());
            args.push(dir.display().to_string());
        }
        self.shared_args = args;
    }

    /// Build the full subprocess request for one message.
    pub fn build_invocation(&self, params: InvocationParams<'_>) -> SpawnRequest {
        let persona = params.persona;
        let mut args = self.base_args.clone();

        if !params.first_message {
            args.push(CONTINUE_FLAG.to_string());
        }
        if params.brave {
            args.push(BRAVE_FLAG.to_string());
        }

        let selection = derive_model(
            persona.model.as_deref().or(self.model.as_deref()),
            params.prompt,
        );
        if let Some(model) = selection.model {
            args.push("--model".to_string());
            args.push(model);
        }
        if selection.thinking {
            args.push(THINKING_FLAG.to_string());
        }

        if let Some(budget) = persona.max_budget_usd.or(self.max_budget_usd) {
            args.push("--max-budget-usd".to_string());
            args.push(budget.to_string());
        }

        args.extend(self.shared_args.iter().cloned());

        let disallowed = if persona.disallowed_tools.is_empty() {
            &self.disallowed_tools
        } else {
            &persona.disallowed_tools
        };
        if !disallowed.is_empty() {
            args.push("--disallowedTools".to_string());
            args.push(disallowed.join(","));
        }

        let allowed = if persona.allowed_tools.is_empty() {
            &self.allowed_tools
        } else {
            &persona.allowed_tools
        };
        if !allowed.is_empty() && !allows_everything(allowed) {
            args.push("--allowedTools".to_string());
            args.push(allowed.join(","));
        }

        if let Some(system_prompt) = persona.system_prompt.as_deref().filter(|s| !s.is_empty()) {
            args.push("--append-system-prompt".to_string());
            args.push(system_prompt.to_string());
        }

        args.push(params.prompt.to_string());

        let mut env = self.env.clone();
        if !self.has_env("PATH") {
            env.push(("PATH".to_string(), resolve_shell_path()));
        }

        SpawnRequest {
            agent_id: params.agent_id.to_string(),
            program: self.executable.clone(),
            args,
            cwd: params
                .working_dir
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| self.working_dir.clone()),
            env,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CliConfig {
        CliConfig::new("/usr/local/bin/claude", "/repo").with_env("PATH", "/usr/bin")
    }

    fn params<'a>(persona: &'a Persona, prompt: &'a str, first: bool) -> InvocationParams<'a> {
        InvocationParams {
            agent_id: "main",
            prompt,
            first_message: first,
            brave: false,
            persona,
            working_dir: None,
        }
    }

    #[test]
    fn test_derive_model_strips_suffix() {
        let sel = derive_model(Some("opus-thinking"), "hi");
        assert_eq!(sel.model.as_deref(), Some("opus"));
        assert!(sel.thinking);
    }

    #[test]
    fn test_derive_model_prompt_prefix() {
        let sel = derive_model(Some("sonnet"), "  [UltraThink] refactor this");
        assert_eq!(sel.model.as_deref(), Some("sonnet"));
        assert!(sel.thinking);

        let sel = derive_model(None, "think about it");
        assert_eq!(sel.model, None);
        assert!(!sel.thinking);
    }

    #[test]
    fn test_first_message_has_no_continue() {
        let persona = Persona::default();
        let req = config().build_invocation(params(&persona, "hello", true));
        assert_eq!(req.args, vec!["-p", "--output-format", "stream-json", "--verbose", "hello"]);
        assert_eq!(req.cwd, PathBuf::from("/repo"));
        assert_eq!(req.env, vec![("PATH".to_string(), "/usr/bin".to_string())]);

        let req = config().build_invocation(params(&persona, "again", false));
        assert!(req.has_flag(CONTINUE_FLAG));
    }

    #[test]
    fn test_full_argument_order() {
        let persona = Persona::new("reviewer")
            .with_system_prompt("Be strict.")
            .with_allowed_tools(vec!["Read".to_string(), "Grep".to_string()]);
        let cfg = config()
            .with_model(Some("opus-thinking".to_string()))
            .with_max_budget(Some(2.5))
            .with_mcp_config(Some(PathBuf::from("/repo/mcp.json")))
            .with_additional_dirs(vec![PathBuf::from("/a"), PathBuf::from("/b")])
            .with_tools(Vec::new(), vec!["Bash".to_string(), "WebFetch".to_string()]);

        let mut p = params(&persona, "review", false);
        p.brave = true;
        let req = cfg.build_invocation(p);

        assert_eq!(
            req.args,
            vec![
                "-p",
                "--output-format",
                "stream-json",
                "--verbose",
                "--continue",
                "--dangerously-skip-permissions",
                "--model",
                "opus",
                "--thinking",
                "--max-budget-usd",
                "2.5",
                "--mcp-config",
                "/repo/mcp.json",
                "--add-dir",
                "/a",
                "--add-dir",
                "/b",
                "--disallowedTools",
                "Bash,WebFetch",
                "--allowedTools",
                "Read,Grep",
                "--append-system-prompt",
                "Be strict.",
                "review",
            ]
        );
    }

    #[test]
    fn test_wildcard_allow_list_omitted() {
        let persona = Persona::default();
        let cfg = config().with_tools(vec!["*".to_string()], Vec::new());
        let req = cfg.build_invocation(params(&persona, "go", true));
        assert!(!req.has_flag("--allowedTools"));

        let cfg = config().with_tools(vec!["all".to_string()], Vec::new());
        let req = cfg.build_invocation(params(&persona, "go", true));
        assert!(!req.has_flag("--allowedTools"));
    }

    #[test]
    fn test_persona_overrides_global() {
        let persona = Persona::new("cheap")
            .with_model("haiku")
            .with_max_budget(0.5);
        let cfg = config()
            .with_model(Some("opus".to_string()))
            .with_max_budget(Some(10.0));
        let req = cfg.build_invocation(params(&persona, "go", true));
        assert_eq!(req.flag_value("--model"), Some("haiku"));
        assert_eq!(req.flag_value("--max-budget-usd"), Some("0.5"));
    }

    #[test]
    fn test_setters_rebuild_shared_args() {
        let mut cfg = config();
        assert!(cfg.shared_args().is_empty());
        cfg.set_additional_dirs(vec![PathBuf::from("/x")]);
        assert_eq!(cfg.shared_args(), ["--add-dir".to_string(), "/x".to_string()]);
        cfg.set_additional_dirs(Vec::new());
        assert!(cfg.shared_args().is_empty());
    }

    #[test]
    fn test_prompt_is_last_even_with_flags_inside() {
        let persona = Persona::default();
        let req = config().build_invocation(params(&persona, "--model evil", true));
        assert_eq!(req.prompt(), Some("--model evil"));
        assert_eq!(req.flag_value("--model"), None);
    }
}
