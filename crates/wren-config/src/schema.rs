// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub permissions: PermissionsConfig,
    #[serde(default)]
    pub mcp: McpConfig,
}

impl Config {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.mcp.validate()
    }
}

// ── Model ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier: "mock" (echo) or "yaml-mock" (scripted rules).
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Rule file used by the "yaml-mock" provider.
    #[serde(default)]
    pub mock_responses_file: Option<String>,
}

fn default_provider() -> String {
    "mock".into()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            mock_responses_file: None,
        }
    }
}

// ── Agent loop ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum tool-call rounds within one turn before the loop stops.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    /// Ask the model for a progress summary after every N cumulative tool
    /// calls in a turn.  0 disables narration.
    #[serde(default)]
    pub narration_every: u32,
    /// Ephemeral user message injected for narration.
    #[serde(default = "default_narration_prompt")]
    pub narration_prompt: String,
    /// Emit a one-shot plan suggestion once a turn has made this many tool
    /// calls.  0 disables the suggestion.
    #[serde(default)]
    pub auto_plan_threshold: u32,
    /// Tool results longer than this (in bytes) are replaced with a
    /// truncation notice before the next inference call.
    #[serde(default = "default_tool_output_max_chars")]
    pub tool_output_max_chars: usize,
    /// Deepest allowed nesting of sub-agents.
    #[serde(default = "default_max_subagent_depth")]
    pub max_subagent_depth: usize,
    /// Maximum sub-agents running at the same time across the process.
    #[serde(default = "default_max_subagent_fanout")]
    pub max_subagent_fanout: usize,
    /// Extra system instruction forwarded with every inference call.
    #[serde(default)]
    pub system_instruction: Option<String>,
}

fn default_max_tool_rounds() -> u32 {
    50
}
fn default_narration_prompt() -> String {
    "Briefly summarise what you have done so far and what you will do next. \
     Do not call any tools."
        .into()
}
fn default_tool_output_max_chars() -> usize {
    20_000
}
fn default_max_subagent_depth() -> usize {
    2
}
fn default_max_subagent_fanout() -> usize {
    4
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            narration_every: 0,
            narration_prompt: default_narration_prompt(),
            auto_plan_threshold: 0,
            tool_output_max_chars: default_tool_output_max_chars(),
            max_subagent_depth: default_max_subagent_depth(),
            max_subagent_fanout: default_max_subagent_fanout(),
            system_instruction: None,
        }
    }
}

// ── Permissions ──────────────────────────────────────────────────────────────

/// Process-wide policy governing which tool tiers require a human decision.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalMode {
    /// Never ask; only hard detectors and the deny list apply.
    Auto,
    /// Ask for destructive tools only.
    AskForDangerous,
    /// Ask for anything that writes, executes or destroys.
    #[default]
    AskForWrites,
    /// Ask for everything above read-only.
    Ask,
}

impl std::fmt::Display for ApprovalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApprovalMode::Auto => write!(f, "auto"),
            ApprovalMode::AskForDangerous => write!(f, "ask-for-dangerous"),
            ApprovalMode::AskForWrites => write!(f, "ask-for-writes"),
            ApprovalMode::Ask => write!(f, "ask"),
        }
    }
}

/// Intrinsic risk classification of a tool.  Variants are declared in
/// ascending order so the derived `Ord` is the policy order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolTier {
    Read,
    Write,
    Execute,
    Destructive,
}

impl std::fmt::Display for ToolTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolTier::Read => write!(f, "read"),
            ToolTier::Write => write!(f, "write"),
            ToolTier::Execute => write!(f, "execute"),
            ToolTier::Destructive => write!(f, "destructive"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionsConfig {
    #[serde(default)]
    pub mode: ApprovalMode,
    /// Tools that never need approval.
    #[serde(default)]
    pub allowed_tools: HashSet<String>,
    /// Tools that are always refused.  Wins over `allowed_tools`.
    #[serde(default)]
    pub denied_tools: HashSet<String>,
    /// Per-tool tier overrides, keyed by exact tool name.
    #[serde(default)]
    pub tier_overrides: HashMap<String, ToolTier>,
    /// Tier assigned to tools nobody classified, which in practice means
    /// tools discovered on external servers.
    #[serde(default = "default_external_tier")]
    pub external_default_tier: ToolTier,
    /// Seconds a remote approval request may stay unanswered before it is
    /// treated as denied.
    #[serde(default = "default_approval_timeout_secs")]
    pub approval_timeout_secs: u64,
}

fn default_external_tier() -> ToolTier {
    ToolTier::Execute
}
fn default_approval_timeout_secs() -> u64 {
    120
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            mode: ApprovalMode::default(),
            allowed_tools: HashSet::new(),
            denied_tools: HashSet::new(),
            tier_overrides: HashMap::new(),
            external_default_tier: default_external_tier(),
            approval_timeout_secs: default_approval_timeout_secs(),
        }
    }
}

// ── External tool servers ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    /// Upper bound on the whole shutdown sequence, however many servers.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            servers: Vec::new(),
        }
    }
}

impl McpConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut seen = HashSet::new();
        for server in &self.servers {
            if server.name.trim().is_empty() {
                anyhow::bail!("mcp server entry has an empty name");
            }
            if !seen.insert(server.name.as_str()) {
                anyhow::bail!("duplicate mcp server name: {}", server.name);
            }
            if server.timeout_secs == 0 {
                anyhow::bail!("mcp server {}: timeout_secs must be positive", server.name);
            }
        }
        Ok(())
    }

    /// Servers with `enabled = true`.
    pub fn enabled_servers(&self) -> impl Iterator<Item = &McpServerConfig> {
        self.servers.iter().filter(|s| s.enabled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    pub transport: McpTransportConfig,
    /// Connection attempt timeout in seconds.
    #[serde(default = "default_server_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_server_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpTransportConfig {
    /// Subprocess speaking JSON-RPC over stdin/stdout.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// Remote server reached with JSON-RPC over HTTP POST.
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_are_totally_ordered() {
        assert!(ToolTier::Read < ToolTier::Write);
        assert!(ToolTier::Write < ToolTier::Execute);
        assert!(ToolTier::Execute < ToolTier::Destructive);
    }

    #[test]
    fn defaults_are_sensible() {
        let c = Config::default();
        assert_eq!(c.permissions.mode, ApprovalMode::AskForWrites);
        assert_eq!(c.permissions.external_default_tier, ToolTier::Execute);
        assert_eq!(c.agent.max_tool_rounds, 50);
        assert_eq!(c.agent.narration_every, 0);
        assert_eq!(c.mcp.shutdown_timeout_secs, 5);
        assert!(c.mcp.servers.is_empty());
    }

    #[test]
    fn parses_full_toml() {
        let text = r#"
[permissions]
mode = "ask-for-dangerous"
allowed_tools = ["read_file"]
denied_tools = ["delete_file"]
external_default_tier = "write"

[permissions.tier_overrides]
bash = "destructive"

[[mcp.servers]]
name = "files"
transport = { type = "stdio", command = "mcp-files", args = ["--root", "."] }

[[mcp.servers]]
name = "remote"
timeout_secs = 5
transport = { type = "http", url = "http://localhost:9000/mcp" }
"#;
        let c: Config = toml::from_str(text).unwrap();
        assert_eq!(c.permissions.mode, ApprovalMode::AskForDangerous);
        assert!(c.permissions.allowed_tools.contains("read_file"));
        assert!(c.permissions.denied_tools.contains("delete_file"));
        assert_eq!(c.permissions.tier_overrides["bash"], ToolTier::Destructive);
        assert_eq!(c.permissions.external_default_tier, ToolTier::Write);
        assert_eq!(c.mcp.servers.len(), 2);
        assert_eq!(c.mcp.servers[0].timeout_secs, 30);
        assert!(c.mcp.servers[0].enabled);
        match &c.mcp.servers[0].transport {
            McpTransportConfig::Stdio { command, args, .. } => {
                assert_eq!(command, "mcp-files");
                assert_eq!(args, &vec!["--root".to_string(), ".".to_string()]);
            }
            other => panic!("expected stdio transport, got {other:?}"),
        }
        assert_eq!(c.mcp.servers[1].timeout_secs, 5);
        c.validate().unwrap();
    }

    fn server(name: &str, timeout_secs: u64) -> McpServerConfig {
        McpServerConfig {
            name: name.into(),
            transport: McpTransportConfig::Http {
                url: "http://localhost".into(),
                headers: HashMap::new(),
            },
            timeout_secs,
            enabled: true,
        }
    }

    #[test]
    fn validate_rejects_duplicate_names() {
        let cfg = McpConfig {
            servers: vec![server("a", 1), server("a", 1)],
            ..McpConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let cfg = McpConfig {
            servers: vec![server("a", 0)],
            ..McpConfig::default()
        };
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("timeout_secs"), "{err}");
    }

    #[test]
    fn approval_mode_display_matches_serde_name() {
        for mode in [
            ApprovalMode::Auto,
            ApprovalMode::AskForDangerous,
            ApprovalMode::AskForWrites,
            ApprovalMode::Ask,
        ] {
            let v = toml::Value::try_from(mode).unwrap();
            assert_eq!(v.as_str(), Some(mode.to_string().as_str()));
        }
    }
}
