// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier returned by the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub args: Value,
}

/// The result of executing a tool.
///
/// An error here is a *tool-level* failure: it is reported back to the model
/// as a tool message and never aborts the agent loop.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    /// Human/model-readable output, or the error message when `is_error`.
    pub content: String,
    /// Structured payload for callers that want more than text.
    pub raw: Option<Value>,
    pub is_error: bool,
}

impl ToolOutput {
    /// Successful plain-text result.
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            raw: None,
            is_error: false,
        }
    }

    /// Successful result carrying a structured payload alongside its text
    /// rendering.
    pub fn ok_with_raw(call_id: impl Into<String>, content: impl Into<String>, raw: Value) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            raw: Some(raw),
            is_error: false,
        }
    }

    /// Error result containing a plain-text error message.
    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: msg.into(),
            raw: None,
            is_error: true,
        }
    }

    pub fn success(&self) -> bool {
        !self.is_error
    }
}

/// Trait that every built-in and user-defined tool must implement.
///
/// Tools are registered once at startup and shared across concurrent
/// executions; a tool that keeps mutable state must declare
/// `concurrency_safe() == false` (the default) so the runtime serializes it.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the parameters object.
    fn parameters_schema(&self) -> Value;
    /// Keys that must be present in the arguments object.
    fn required_params(&self) -> &[&str] {
        &[]
    }
    /// Short human-readable line for UIs, derived from the arguments.
    fn display_summary(&self, _args: &Value) -> String {
        self.name().to_string()
    }
    /// Per-execution timeout.  The runtime caps this at 300 s.
    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }
    /// Whether two executions of this instance may overlap.
    fn concurrency_safe(&self) -> bool {
        false
    }
    /// Execute the tool.  Errors must be wrapped in [`ToolOutput::err`].
    async fn execute(&self, call: &ToolCall, cancel: &CancellationToken) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
