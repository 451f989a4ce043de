// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::events::ToolEvent;
use crate::{Tool, ToolCall, ToolOutput};

/// Hard ceiling on any single tool execution, regardless of what the tool
/// declares.
const MAX_TOOL_TIMEOUT: Duration = Duration::from_secs(300);

/// A tool schema as offered to the model.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

struct Entry {
    tool: Arc<dyn Tool>,
    /// Serializes executions of tools that are not concurrency-safe.
    exec_lock: Option<Arc<Mutex<()>>>,
}

/// Central registry holding all available tools.
///
/// Lookups are case-insensitive.  Duplicate registrations keep the *first*
/// tool and log a warning.  Reads are concurrent; registration remains
/// correct after the first lookup (interior `RwLock`).
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Entry>>,
    subscribers: RwLock<Vec<mpsc::Sender<ToolEvent>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Register a tool.  When a tool with the same (case-insensitive) name
    /// already exists, the first registration wins and this call is ignored
    /// with a warning.
    pub fn register(&self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&self, tool: Arc<dyn Tool>) {
        let key = tool.name().to_lowercase();
        let mut tools = self.tools.write().unwrap();
        if tools.contains_key(&key) {
            warn!(tool = %tool.name(), "duplicate tool registration ignored; first registration wins");
            return;
        }
        let exec_lock = if tool.concurrency_safe() {
            None
        } else {
            Some(Arc::new(Mutex::new(())))
        };
        tools.insert(key, Entry { tool, exec_lock });
    }

    /// Subscribe to tool runtime events.  Delivery is best-effort.
    pub fn subscribe(&self, sender: mpsc::Sender<ToolEvent>) {
        self.subscribers.write().unwrap().push(sender);
    }

    fn emit(&self, event: ToolEvent) {
        for sub in self.subscribers.read().unwrap().iter() {
            let _ = sub.try_send(event.clone());
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .read()
            .unwrap()
            .get(&name.to_lowercase())
            .map(|e| Arc::clone(&e.tool))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools
            .read()
            .unwrap()
            .contains_key(&name.to_lowercase())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .read()
            .unwrap()
            .values()
            .map(|e| e.tool.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Produce schemas for registered tools, optionally filtered by an
    /// allowlist (case-insensitive).  The result is sorted by name so the
    /// array sent to the model is stable across runs.
    pub fn schemas(&self, allowlist: Option<&[String]>) -> Vec<ToolSchema> {
        let allowed: Option<Vec<String>> =
            allowlist.map(|names| names.iter().map(|n| n.to_lowercase()).collect());
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .read()
            .unwrap()
            .iter()
            .filter(|(key, _)| {
                allowed
                    .as_ref()
                    .map(|a| a.contains(key))
                    .unwrap_or(true)
            })
            .map(|(_, e)| ToolSchema {
                name: e.tool.name().to_string(),
                description: e.tool.description().to_string(),
                parameters: e.tool.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Execute one tool call under the runtime contract:
    /// - unknown tool → error output, never a hard failure
    /// - `on_tool_call` event emitted before execution starts
    /// - missing required parameters rejected before the tool runs
    /// - execution bounded by the tool's timeout, capped at 300 s
    /// - non-concurrency-safe tools are serialized per instance
    /// - a panic inside the tool is captured as an error output
    pub async fn execute(&self, call: &ToolCall, cancel: &CancellationToken) -> ToolOutput {
        let (tool, exec_lock) = {
            let tools = self.tools.read().unwrap();
            match tools.get(&call.name.to_lowercase()) {
                Some(e) => (Arc::clone(&e.tool), e.exec_lock.clone()),
                None => {
                    return ToolOutput::err(&call.id, format!("Tool '{}' not found", call.name))
                }
            }
        };

        self.emit(ToolEvent::CallStarted {
            name: tool.name().to_string(),
            args_json: call.args.to_string(),
        });

        if let Err(e) = crate::ToolArgs::new(&call.args)
            .and_then(|args| args.ensure_required(tool.required_params()))
        {
            let out = ToolOutput::err(&call.id, e.to_string());
            self.emit(ToolEvent::CallFinished {
                name: tool.name().to_string(),
                is_error: true,
                elapsed_ms: 0,
            });
            return out;
        }

        let timeout = tool.timeout().min(MAX_TOOL_TIMEOUT);
        let started = Instant::now();

        // Run inside a spawned task so a panicking tool surfaces as a
        // JoinError instead of unwinding through the agent loop.
        let task = {
            let tool = Arc::clone(&tool);
            let call = call.clone();
            let cancel = cancel.child_token();
            tokio::spawn(async move {
                let _guard = match &exec_lock {
                    Some(lock) => Some(lock.lock().await),
                    None => None,
                };
                tool.execute(&call, &cancel).await
            })
        };

        let abort = task.abort_handle();
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                abort.abort();
                ToolOutput::err(&call.id, "tool execution cancelled")
            }
            joined = tokio::time::timeout(timeout, task) => match joined {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => ToolOutput::err(&call.id, format!("tool panicked: {e}")),
                Err(_) => ToolOutput::err(
                    &call.id,
                    format!("tool timed out after {} s", timeout.as_secs()),
                ),
            },
        };

        self.emit(ToolEvent::CallFinished {
            name: tool.name().to_string(),
            is_error: output.is_error,
            elapsed_ms: started.elapsed().as_millis() as u64,
        });
        output
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;

    struct EchoTool {
        name: &'static str,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object", "properties": { "x": { "type": "string" } } })
        }
        fn required_params(&self) -> &[&str] {
            &["x"]
        }
        fn concurrency_safe(&self) -> bool {
            true
        }
        async fn execute(&self, call: &ToolCall, _cancel: &CancellationToken) -> ToolOutput {
            ToolOutput::ok(&call.id, format!("echo:{}", call.args["x"]))
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        fn timeout(&self) -> Duration {
            Duration::from_millis(50)
        }
        async fn execute(&self, call: &ToolCall, _cancel: &CancellationToken) -> ToolOutput {
            tokio::time::sleep(Duration::from_secs(60)).await;
            ToolOutput::ok(&call.id, "never reached")
        }
    }

    struct PanicTool;

    #[async_trait]
    impl Tool for PanicTool {
        fn name(&self) -> &str {
            "panics"
        }
        fn description(&self) -> &str {
            "always panics"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, _call: &ToolCall, _cancel: &CancellationToken) -> ToolOutput {
            panic!("deliberate test panic");
        }
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: "tc-1".into(),
            name: name.into(),
            args,
        }
    }

    #[test]
    fn register_and_lookup_is_case_insensitive() {
        let reg = ToolRegistry::new();
        reg.register(EchoTool { name: "Echo" });
        assert!(reg.get("echo").is_some());
        assert!(reg.get("ECHO").is_some());
        assert!(reg.contains("eChO"));
    }

    #[test]
    fn duplicate_registration_keeps_first() {
        struct OtherEcho;
        #[async_trait]
        impl Tool for OtherEcho {
            fn name(&self) -> &str {
                "echo"
            }
            fn description(&self) -> &str {
                "second registration"
            }
            fn parameters_schema(&self) -> Value {
                json!({ "type": "object" })
            }
            async fn execute(&self, call: &ToolCall, _c: &CancellationToken) -> ToolOutput {
                ToolOutput::ok(&call.id, "other")
            }
        }
        let reg = ToolRegistry::new();
        reg.register(EchoTool { name: "echo" });
        reg.register(OtherEcho);
        assert_eq!(reg.names().len(), 1);
        assert_eq!(reg.get("echo").unwrap().description(), "echoes its input");
    }

    #[test]
    fn schemas_sorted_and_filterable() {
        let reg = ToolRegistry::new();
        reg.register(EchoTool { name: "zeta" });
        reg.register(EchoTool { name: "alpha" });
        let all = reg.schemas(None);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "alpha");

        let filtered = reg.schemas(Some(&["ZETA".to_string()]));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "zeta");
    }

    #[tokio::test]
    async fn execute_known_tool_succeeds() {
        let reg = ToolRegistry::new();
        reg.register(EchoTool { name: "echo" });
        let out = reg
            .execute(&call("echo", json!({"x": "hi"})), &CancellationToken::new())
            .await;
        assert!(out.success(), "{}", out.content);
        assert!(out.content.contains("hi"));
    }

    #[tokio::test]
    async fn execute_unknown_tool_reports_not_found() {
        let reg = ToolRegistry::new();
        let out = reg
            .execute(&call("nope", json!({})), &CancellationToken::new())
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("Tool 'nope' not found"));
    }

    #[tokio::test]
    async fn missing_required_param_fails_before_execution() {
        let reg = ToolRegistry::new();
        reg.register(EchoTool { name: "echo" });
        let out = reg
            .execute(&call("echo", json!({})), &CancellationToken::new())
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("missing required parameter 'x'"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tool_times_out() {
        let reg = ToolRegistry::new();
        reg.register(SlowTool);
        let out = reg
            .execute(&call("slow", json!({})), &CancellationToken::new())
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("timed out"));
    }

    #[tokio::test]
    async fn panicking_tool_becomes_error_output() {
        let reg = ToolRegistry::new();
        reg.register(PanicTool);
        let out = reg
            .execute(&call("panics", json!({})), &CancellationToken::new())
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("panicked"));
    }

    #[tokio::test]
    async fn cancelled_execution_reports_cancellation() {
        let reg = ToolRegistry::new();
        reg.register(SlowTool);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = reg.execute(&call("slow", json!({})), &cancel).await;
        assert!(out.is_error);
        assert!(out.content.contains("cancelled"));
    }

    #[tokio::test]
    async fn call_started_event_emitted_before_execution() {
        let reg = ToolRegistry::new();
        reg.register(EchoTool { name: "echo" });
        let (tx, mut rx) = mpsc::channel(8);
        reg.subscribe(tx);
        let _ = reg
            .execute(&call("echo", json!({"x": "ev"})), &CancellationToken::new())
            .await;
        let first = rx.try_recv().unwrap();
        match first {
            ToolEvent::CallStarted { name, args_json } => {
                assert_eq!(name, "echo");
                assert!(args_json.contains("ev"));
            }
            other => panic!("expected CallStarted first, got {other:?}"),
        }
        assert!(matches!(
            rx.try_recv().unwrap(),
            ToolEvent::CallFinished { is_error: false, .. }
        ));
    }
}
