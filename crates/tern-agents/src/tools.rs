// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Model-facing tools over the orchestrator.
//!
//! These are registered on the *primary* agent only; sub-agent registries
//! never include them, which bounds delegation depth at one level.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use tern_tools::{Tool, ToolArgs, ToolCall, ToolOutput, ToolRegistry};

use crate::manager::{AgentManager, AgentOverrides};

fn parse_uuid(s: &str, what: &str) -> Result<Uuid, String> {
    Uuid::parse_str(s).map_err(|_| format!("invalid {what}: {s:?}"))
}

pub struct SpawnAgentTool {
    pub manager: Arc<AgentManager>,
}

#[async_trait]
impl Tool for SpawnAgentTool {
    fn name(&self) -> &str {
        "spawn_agent"
    }

    fn description(&self) -> &str {
        "Spawn a sub-agent that can work on tasks independently. Returns the \
         new agent's id. Fails when the concurrent-agent cap is reached."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Agent name (alphanumeric plus -_, 1-64 chars)" },
                "system_prompt": { "type": "string", "description": "Optional system prompt for the sub-agent" },
                "temperature": { "type": "number", "description": "Optional sampling temperature (0-2)" },
                "max_tokens": { "type": "integer", "description": "Optional completion token cap" }
            },
            "required": ["name"]
        })
    }

    fn required_params(&self) -> &[&str] {
        &["name"]
    }

    fn display_summary(&self, args: &Value) -> String {
        format!("spawn agent {}", args["name"].as_str().unwrap_or("?"))
    }

    fn concurrency_safe(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall, _cancel: &CancellationToken) -> ToolOutput {
        let args = match ToolArgs::new(&call.args) {
            Ok(a) => a,
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };
        let name = match args.require_str("name") {
            Ok(n) => n,
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };
        let temperature = match args.f64_in("temperature", 0.0, 2.0, -1.0) {
            Ok(t) => (t >= 0.0).then_some(t as f32),
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };
        let overrides = AgentOverrides {
            system_prompt: args.opt_str("system_prompt").map(str::to_string),
            temperature,
            max_tokens: args
                .opt_u64_in("max_tokens", 1, 1_000_000)
                .unwrap_or(None)
                .map(|n| n as u32),
            ..Default::default()
        };
        match self.manager.create_agent(name, overrides).await {
            Ok(id) => ToolOutput::ok_with_raw(
                &call.id,
                format!("spawned agent '{name}' with id {id}"),
                json!({ "agent_id": id.to_string() }),
            ),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

pub struct HandOffTool {
    pub manager: Arc<AgentManager>,
}

#[async_trait]
impl Tool for HandOffTool {
    fn name(&self) -> &str {
        "hand_off"
    }

    fn description(&self) -> &str {
        "Hand a task off to a sub-agent by id. Returns a task id immediately; \
         the task runs asynchronously. Use wait_for_agents to collect results."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agent_id": { "type": "string", "description": "Target agent id from spawn_agent" },
                "description": { "type": "string", "description": "What the sub-agent should do" },
                "context": { "type": "object", "description": "Optional key-value context rendered into the task prompt" }
            },
            "required": ["agent_id", "description"]
        })
    }

    fn required_params(&self) -> &[&str] {
        &["agent_id", "description"]
    }

    fn display_summary(&self, args: &Value) -> String {
        format!("hand off: {}", args["description"].as_str().unwrap_or("?"))
    }

    fn concurrency_safe(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall, _cancel: &CancellationToken) -> ToolOutput {
        let args = match ToolArgs::new(&call.args) {
            Ok(a) => a,
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };
        let agent_id = match args
            .require_str("agent_id")
            .map_err(|e| e.to_string())
            .and_then(|s| parse_uuid(s, "agent_id"))
        {
            Ok(id) => id,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        let description = match args.require_text("description") {
            Ok(d) => d,
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };
        let context = call
            .args
            .get("context")
            .and_then(Value::as_object)
            .cloned();

        match self.manager.hand_off(agent_id, description, context).await {
            Ok(task_id) => ToolOutput::ok_with_raw(
                &call.id,
                format!("task {task_id} queued"),
                json!({ "task_id": task_id.to_string() }),
            ),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

pub struct WaitForAgentsTool {
    pub manager: Arc<AgentManager>,
}

#[async_trait]
impl Tool for WaitForAgentsTool {
    fn name(&self) -> &str {
        "wait_for_agents"
    }

    fn description(&self) -> &str {
        "Wait for one or more tasks to finish. Returns one entry per task id, \
         null for tasks that did not finish within the timeout."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_ids": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Task ids from hand_off"
                },
                "timeout_ms": { "type": "integer", "description": "Wait bound in milliseconds (default 60000, max 240000)" }
            },
            "required": ["task_ids"]
        })
    }

    fn required_params(&self) -> &[&str] {
        &["task_ids"]
    }

    fn timeout(&self) -> std::time::Duration {
        // Must exceed the largest accepted timeout_ms; the runtime caps tool
        // executions at 300 s, which is why timeout_ms stops at 240 s.
        std::time::Duration::from_secs(300)
    }

    fn concurrency_safe(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall, _cancel: &CancellationToken) -> ToolOutput {
        let args = match ToolArgs::new(&call.args) {
            Ok(a) => a,
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };
        let raw_ids = match call.args.get("task_ids").and_then(Value::as_array) {
            Some(ids) => ids,
            None => return ToolOutput::err(&call.id, "task_ids must be an array of strings"),
        };
        let mut task_ids = Vec::with_capacity(raw_ids.len());
        for raw in raw_ids {
            let Some(s) = raw.as_str() else {
                return ToolOutput::err(&call.id, "task_ids must be an array of strings");
            };
            match parse_uuid(s, "task id") {
                Ok(id) => task_ids.push(id),
                Err(e) => return ToolOutput::err(&call.id, e),
            }
        }
        let timeout_ms = match args.opt_u64_in("timeout_ms", 1, 240_000) {
            Ok(t) => t.unwrap_or(60_000),
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };

        let results = self
            .manager
            .wait_for(&task_ids, std::time::Duration::from_millis(timeout_ms))
            .await;
        let rendered: Vec<Value> = results
            .iter()
            .map(|r| match r {
                Some(result) => json!({
                    "task_id": result.task_id.to_string(),
                    "success": result.success,
                    "text": result.text,
                    "duration_ms": result.duration_ms,
                }),
                None => Value::Null,
            })
            .collect();
        ToolOutput::ok_with_raw(
            &call.id,
            serde_json::to_string_pretty(&rendered).unwrap_or_default(),
            json!(rendered),
        )
    }
}

pub struct GetTaskResultTool {
    pub manager: Arc<AgentManager>,
}

#[async_trait]
impl Tool for GetTaskResultTool {
    fn name(&self) -> &str {
        "get_task_result"
    }

    fn description(&self) -> &str {
        "Fetch the result of a task if it has finished. Non-blocking."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": { "type": "string", "description": "Task id from hand_off" }
            },
            "required": ["task_id"]
        })
    }

    fn required_params(&self) -> &[&str] {
        &["task_id"]
    }

    fn concurrency_safe(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall, _cancel: &CancellationToken) -> ToolOutput {
        let args = match ToolArgs::new(&call.args) {
            Ok(a) => a,
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };
        let task_id = match args
            .require_str("task_id")
            .map_err(|e| e.to_string())
            .and_then(|s| parse_uuid(s, "task id"))
        {
            Ok(id) => id,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        match self.manager.get_task_result(task_id) {
            Some(result) => ToolOutput::ok(
                &call.id,
                json!({
                    "success": result.success,
                    "text": result.text,
                    "duration_ms": result.duration_ms,
                })
                .to_string(),
            ),
            None => {
                let state = self
                    .manager
                    .get_task(task_id)
                    .map(|t| t.state.to_string())
                    .unwrap_or_else(|| "unknown".into());
                ToolOutput::ok(&call.id, format!("task not finished (state: {state})"))
            }
        }
    }
}

pub struct AgentStatusTool {
    pub manager: Arc<AgentManager>,
}

#[async_trait]
impl Tool for AgentStatusTool {
    fn name(&self) -> &str {
        "agent_status"
    }

    fn description(&self) -> &str {
        "List all spawned agents with their current status."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    fn concurrency_safe(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall, _cancel: &CancellationToken) -> ToolOutput {
        let statuses = self.manager.list_agent_statuses().await;
        if statuses.is_empty() {
            return ToolOutput::ok(&call.id, "no agents spawned");
        }
        let lines: Vec<String> = statuses
            .iter()
            .map(|s| format!("{} {} {}", s.id, s.name, s.status))
            .collect();
        ToolOutput::ok(&call.id, lines.join("\n"))
    }
}

pub struct TerminateAgentTool {
    pub manager: Arc<AgentManager>,
}

#[async_trait]
impl Tool for TerminateAgentTool {
    fn name(&self) -> &str {
        "terminate_agent"
    }

    fn description(&self) -> &str {
        "Terminate a sub-agent by id, or pass \"all\" to terminate every \
         agent. Queued tasks are cancelled; the in-flight run is aborted."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agent_id": { "type": "string", "description": "Agent id, or \"all\"" }
            },
            "required": ["agent_id"]
        })
    }

    fn required_params(&self) -> &[&str] {
        &["agent_id"]
    }

    fn concurrency_safe(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall, _cancel: &CancellationToken) -> ToolOutput {
        let args = match ToolArgs::new(&call.args) {
            Ok(a) => a,
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };
        let raw = match args.require_str("agent_id") {
            Ok(r) => r,
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };
        if raw == "all" {
            self.manager.terminate_all().await;
            return ToolOutput::ok(&call.id, "all agents terminated");
        }
        let agent_id = match parse_uuid(raw, "agent_id") {
            Ok(id) => id,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        match self.manager.terminate_agent(agent_id).await {
            Ok(()) => ToolOutput::ok(&call.id, format!("agent {agent_id} terminated")),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

/// Register the full orchestration tool set on a (primary-agent) registry.
pub fn register_orchestration_tools(registry: &ToolRegistry, manager: Arc<AgentManager>) {
    registry.register(SpawnAgentTool { manager: Arc::clone(&manager) });
    registry.register(HandOffTool { manager: Arc::clone(&manager) });
    registry.register(WaitForAgentsTool { manager: Arc::clone(&manager) });
    registry.register(GetTaskResultTool { manager: Arc::clone(&manager) });
    registry.register(AgentStatusTool { manager: Arc::clone(&manager) });
    registry.register(TerminateAgentTool { manager });
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use tern_config::{AgentConfig, OrchestratorConfig};
    use tern_model::mock::ScriptedProvider;
    use tern_store::NullStore;

    use super::*;

    fn manager() -> Arc<AgentManager> {
        Arc::new(AgentManager::new(
            OrchestratorConfig { max_concurrent_agents: 3, task_queue_depth: 8 },
            AgentConfig::default(),
            Arc::new(ScriptedProvider::always_text("sub-agent reply")),
            Arc::new(NullStore),
            Arc::new(|| Arc::new(ToolRegistry::new())),
        ))
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall { id: "t-1".into(), name: name.into(), args }
    }

    #[tokio::test]
    async fn spawn_hand_off_wait_round_trip() {
        let manager = manager();
        let spawn = SpawnAgentTool { manager: Arc::clone(&manager) };
        let out = spawn
            .execute(&call("spawn_agent", json!({"name": "helper"})), &CancellationToken::new())
            .await;
        assert!(out.success(), "{}", out.content);
        let agent_id = out.raw.unwrap()["agent_id"].as_str().unwrap().to_string();

        let hand_off = HandOffTool { manager: Arc::clone(&manager) };
        let out = hand_off
            .execute(
                &call(
                    "hand_off",
                    json!({"agent_id": agent_id, "description": "summarize the repo"}),
                ),
                &CancellationToken::new(),
            )
            .await;
        assert!(out.success(), "{}", out.content);
        let task_id = out.raw.unwrap()["task_id"].as_str().unwrap().to_string();

        let wait = WaitForAgentsTool { manager: Arc::clone(&manager) };
        let out = wait
            .execute(
                &call(
                    "wait_for_agents",
                    json!({"task_ids": [task_id], "timeout_ms": 2000}),
                ),
                &CancellationToken::new(),
            )
            .await;
        assert!(out.success(), "{}", out.content);
        assert!(out.content.contains("sub-agent reply"));
    }

    #[tokio::test]
    async fn spawn_with_invalid_name_is_tool_error() {
        let spawn = SpawnAgentTool { manager: manager() };
        let out = spawn
            .execute(&call("spawn_agent", json!({"name": "no spaces"})), &CancellationToken::new())
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("invalid agent name"));
    }

    #[tokio::test]
    async fn hand_off_with_bad_uuid_is_tool_error() {
        let hand_off = HandOffTool { manager: manager() };
        let out = hand_off
            .execute(
                &call("hand_off", json!({"agent_id": "not-a-uuid", "description": "x"})),
                &CancellationToken::new(),
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("invalid agent_id"));
    }

    #[tokio::test]
    async fn get_task_result_reports_pending_state() {
        let tool = GetTaskResultTool { manager: manager() };
        let out = tool
            .execute(
                &call("get_task_result", json!({"task_id": Uuid::new_v4().to_string()})),
                &CancellationToken::new(),
            )
            .await;
        assert!(out.success());
        assert!(out.content.contains("unknown"));
    }

    #[tokio::test]
    async fn status_tool_lists_agents() {
        let manager = manager();
        manager.create_agent("visible", AgentOverrides::default()).await.unwrap();
        let tool = AgentStatusTool { manager: Arc::clone(&manager) };
        let out = tool
            .execute(&call("agent_status", json!({})), &CancellationToken::new())
            .await;
        assert!(out.content.contains("visible"));
        assert!(out.content.contains("idle"));
    }

    #[tokio::test]
    async fn terminate_all_via_tool() {
        let manager = manager();
        manager.create_agent("one", AgentOverrides::default()).await.unwrap();
        manager.create_agent("two", AgentOverrides::default()).await.unwrap();
        let tool = TerminateAgentTool { manager: Arc::clone(&manager) };
        let out = tool
            .execute(&call("terminate_agent", json!({"agent_id": "all"})), &CancellationToken::new())
            .await;
        assert!(out.success());
        assert_eq!(manager.agent_count().await, 0);
    }

    #[tokio::test]
    async fn register_helper_installs_all_six_tools() {
        let registry = ToolRegistry::new();
        register_orchestration_tools(&registry, manager());
        for name in [
            "spawn_agent",
            "hand_off",
            "wait_for_agents",
            "get_task_result",
            "agent_status",
            "terminate_agent",
        ] {
            assert!(registry.contains(name), "missing {name}");
        }
    }
}
