// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `false`, so fields
/// that should be enabled unless explicitly disabled need a named function.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub patch: PatchConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Chat API key, encrypted at rest (see `secrets`).  Prefer the
    /// OPENROUTER_API_KEY environment variable over storing a key here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Global fallback key used when neither the environment variable nor a
    /// dedicated key is present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_api_key: Option<String>,
}

fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_top_p() -> f32 {
    1.0
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_max_tool_rounds() -> u32 {
    32
}

/// Per-agent configuration.  Built at agent construction and treated as
/// read-only for the duration of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Display name; must satisfy `validate::agent_name` rules.
    #[serde(default)]
    pub name: String,
    /// Model identifier forwarded to the chat API.
    #[serde(default = "default_model")]
    pub model: String,
    /// Chat completions base URL (everything before `/chat/completions`).
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// System prompt; `None` means no system message is injected.
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_true")]
    pub stream: bool,
    /// Keep conversation history across turns.
    #[serde(default = "default_true")]
    pub maintain_history: bool,
    /// When set, non-system messages are trimmed from the front of the
    /// outgoing request until the total is within this cap.  System
    /// messages are always preserved.
    #[serde(default)]
    pub max_history_messages: Option<usize>,
    #[serde(default = "default_true")]
    pub enable_tools: bool,
    /// When present, only tools named here are offered to the model.
    #[serde(default)]
    pub tool_allowlist: Option<Vec<String>>,
    /// Require interactive approval before running shell commands.
    #[serde(default)]
    pub require_command_approval: bool,
    /// Maximum autonomous tool-call rounds before the run fails with a
    /// protocol error.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "primary".into(),
            model: default_model(),
            base_url: default_base_url(),
            system_prompt: None,
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
            stream: true,
            maintain_history: true,
            max_history_messages: None,
            enable_tools: true,
            tool_allowlist: None,
            require_command_approval: false,
            max_tool_rounds: default_max_tool_rounds(),
        }
    }
}

/// Which engine applies an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PatchStrategy {
    /// Dispatch on edit shape: structured patches go local, free-form edits
    /// go remote with local fallback.
    #[default]
    Auto,
    /// Always use the remote fast-apply service.
    Remote,
    /// Never contact the remote service.
    Local,
}

impl std::fmt::Display for PatchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatchStrategy::Auto => write!(f, "auto"),
            PatchStrategy::Remote => write!(f, "remote"),
            PatchStrategy::Local => write!(f, "local"),
        }
    }
}

fn default_patch_model() -> String {
    "morph-v2".into()
}
fn default_patch_timeout() -> u64 {
    30
}

/// Remote fast-apply service configuration (morph-config.json).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchConfig {
    /// Base URL of the fast-apply chat endpoint.  `None` disables the
    /// remote strategy entirely.
    #[serde(default)]
    pub remote_url: Option<String>,
    /// Model identifier sent to the fast-apply service.
    #[serde(default = "default_patch_model")]
    pub model: String,
    /// Fast-apply API key, encrypted at rest.  The MORPH_API_KEY
    /// environment variable takes precedence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default)]
    pub strategy: PatchStrategy,
    /// Fall back to the local patcher when the remote service fails.
    #[serde(default = "default_true")]
    pub enable_fallback: bool,
    /// Remote request timeout in seconds.
    #[serde(default = "default_patch_timeout")]
    pub timeout_secs: u64,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            model: default_patch_model(),
            api_key: None,
            strategy: PatchStrategy::Auto,
            enable_fallback: true,
            timeout_secs: default_patch_timeout(),
        }
    }
}

fn default_max_agents() -> usize {
    5
}
fn default_queue_depth() -> usize {
    32
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Hard cap on concurrently live sub-agents.
    #[serde(default = "default_max_agents")]
    pub max_concurrent_agents: usize,
    /// Bounded depth of each agent's task queue.
    #[serde(default = "default_queue_depth")]
    pub task_queue_depth: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_agents: default_max_agents(),
            task_queue_depth: default_queue_depth(),
        }
    }
}

fn default_tool_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Default per-tool execution timeout in seconds.  Individual tools may
    /// declare their own; all are capped at 300 s by the runtime.
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,
    /// Workspace root that path arguments are sandboxed to.  Defaults to
    /// the process working directory at startup.
    #[serde(default)]
    pub workspace_root: Option<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_tool_timeout(),
            workspace_root: None,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_agent_config_is_streaming_with_tools() {
        let c = AgentConfig::default();
        assert!(c.stream);
        assert!(c.enable_tools);
        assert!(c.maintain_history);
        assert_eq!(c.max_tool_rounds, 32);
    }

    #[test]
    fn empty_json_deserializes_to_defaults() {
        let c: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(c.agent.max_tokens, 4096);
        assert_eq!(c.orchestrator.max_concurrent_agents, 5);
        assert_eq!(c.patch.strategy, PatchStrategy::Auto);
    }

    #[test]
    fn partial_json_overrides_only_named_fields() {
        let c: Config =
            serde_json::from_str(r#"{"agent":{"temperature":0.7,"max_history_messages":5}}"#)
                .unwrap();
        assert_eq!(c.agent.temperature, 0.7);
        assert_eq!(c.agent.max_history_messages, Some(5));
        // untouched fields keep their defaults
        assert_eq!(c.agent.max_tokens, 4096);
        assert!(c.agent.stream);
    }

    #[test]
    fn patch_strategy_round_trips_lowercase() {
        let s = serde_json::to_string(&PatchStrategy::Remote).unwrap();
        assert_eq!(s, r#""remote""#);
        let back: PatchStrategy = serde_json::from_str(&s).unwrap();
        assert_eq!(back, PatchStrategy::Remote);
    }

    #[test]
    fn api_keys_omitted_from_serialized_defaults() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        assert!(!json.contains("api_key"));
    }
}
