// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tern_exec::ParallelExecutor;

use crate::tool::{Tool, ToolCall, ToolOutput};
use crate::ToolArgs;

const MAX_COMMANDS: usize = 16;
const MAX_OUTPUT_BYTES: usize = 16 * 1024;

/// Fan a batch of shell commands out through the shared executor.  Results
/// come back in input order regardless of completion order.
pub struct ParallelCommandsTool {
    pub root: PathBuf,
    pub executor: Arc<ParallelExecutor>,
}

#[async_trait]
impl Tool for ParallelCommandsTool {
    fn name(&self) -> &str {
        "parallel_commands"
    }

    fn description(&self) -> &str {
        "Run up to 16 independent shell commands concurrently and return one \
         entry per command, in input order. Commands must not depend on each \
         other's effects."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "commands": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Command lines passed to sh -c"
                }
            },
            "required": ["commands"]
        })
    }

    fn required_params(&self) -> &[&str] {
        &["commands"]
    }

    fn display_summary(&self, args: &Value) -> String {
        let n = args["commands"].as_array().map(Vec::len).unwrap_or(0);
        format!("run {n} commands in parallel")
    }

    fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(120)
    }

    async fn execute(&self, call: &ToolCall, cancel: &CancellationToken) -> ToolOutput {
        let _ = match ToolArgs::new(&call.args) {
            Ok(a) => a,
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };
        let raw = match call.args.get("commands").and_then(Value::as_array) {
            Some(arr) => arr,
            None => return ToolOutput::err(&call.id, "commands must be an array of strings"),
        };
        if raw.is_empty() {
            return ToolOutput::err(&call.id, "commands is empty");
        }
        if raw.len() > MAX_COMMANDS {
            return ToolOutput::err(
                &call.id,
                format!("too many commands ({}, max {MAX_COMMANDS})", raw.len()),
            );
        }
        let mut commands = Vec::with_capacity(raw.len());
        for v in raw {
            match v.as_str() {
                Some(s) => commands.push(s.to_string()),
                None => return ToolOutput::err(&call.id, "commands must be an array of strings"),
            }
        }

        debug!(count = commands.len(), "parallel_commands");

        let tasks: Vec<tern_exec::DagFuture<String>> = commands
            .iter()
            .map(|command| {
                let command = command.clone();
                let root = self.root.clone();
                let fut: tern_exec::DagFuture<String> =
                    Box::pin(async move { run_one(&root, &command).await });
                fut
            })
            .collect();

        match self
            .executor
            .execute_parallel(tasks, true, cancel)
            .await
        {
            Ok(results) => {
                let rendered: Vec<Value> = commands
                    .iter()
                    .zip(results)
                    .map(|(command, result)| match result {
                        Ok(output) => json!({ "command": command, "output": output }),
                        Err(e) => json!({ "command": command, "error": e.to_string() }),
                    })
                    .collect();
                ToolOutput::ok_with_raw(
                    &call.id,
                    serde_json::to_string_pretty(&rendered).unwrap_or_default(),
                    json!(rendered),
                )
            }
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

async fn run_one(root: &std::path::Path, command: &str) -> anyhow::Result<String> {
    let output = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await?;

    let mut text = String::new();
    text.push_str(&String::from_utf8_lossy(&output.stdout));
    if !output.stderr.is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&String::from_utf8_lossy(&output.stderr));
    }
    if text.len() > MAX_OUTPUT_BYTES {
        let mut end = MAX_OUTPUT_BYTES;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
        text.push_str("\n[output truncated]");
    }
    Ok(format!("exit {}\n{text}", output.status.code().unwrap_or(-1)))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn tool(dir: &std::path::Path) -> ParallelCommandsTool {
        ParallelCommandsTool {
            root: dir.to_path_buf(),
            executor: Arc::new(ParallelExecutor::with_limits(2, 4)),
        }
    }

    fn call(args: Value) -> ToolCall {
        ToolCall { id: "pc-1".into(), name: "parallel_commands".into(), args }
    }

    #[tokio::test]
    async fn results_preserve_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let t = tool(dir.path());
        let out = t
            .execute(
                &call(json!({"commands": ["echo first", "echo second", "echo third"]})),
                &CancellationToken::new(),
            )
            .await;
        assert!(out.success(), "{}", out.content);
        let rendered = out.raw.unwrap();
        assert!(rendered[0]["output"].as_str().unwrap().contains("first"));
        assert!(rendered[1]["output"].as_str().unwrap().contains("second"));
        assert!(rendered[2]["output"].as_str().unwrap().contains("third"));
    }

    #[tokio::test]
    async fn failing_command_does_not_sink_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let t = tool(dir.path());
        let out = t
            .execute(
                &call(json!({"commands": ["exit 7", "echo fine"]})),
                &CancellationToken::new(),
            )
            .await;
        assert!(out.success());
        let rendered = out.raw.unwrap();
        assert!(rendered[0]["output"].as_str().unwrap().starts_with("exit 7"));
        assert!(rendered[1]["output"].as_str().unwrap().contains("fine"));
    }

    #[tokio::test]
    async fn rejects_oversized_batches() {
        let dir = tempfile::tempdir().unwrap();
        let t = tool(dir.path());
        let commands: Vec<String> = (0..20).map(|i| format!("echo {i}")).collect();
        let out = t
            .execute(&call(json!({"commands": commands})), &CancellationToken::new())
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("too many"));
    }

    #[tokio::test]
    async fn rejects_non_string_entries() {
        let dir = tempfile::tempdir().unwrap();
        let t = tool(dir.path());
        let out = t
            .execute(&call(json!({"commands": ["ok", 3]})), &CancellationToken::new())
            .await;
        assert!(out.is_error);
    }
}
