// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::tool::{Tool, ToolCall, ToolOutput};
use crate::ToolArgs;

const MAX_OUTPUT_BYTES: usize = 64 * 1024;

pub struct RunCommandTool {
    pub root: PathBuf,
    /// Default timeout; individual calls may lower it.
    pub timeout_secs: u64,
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Run a shell command in the workspace root and return its combined \
         stdout/stderr plus exit status."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Command line passed to sh -c" },
                "timeout_secs": { "type": "integer", "description": "Per-call timeout override (optional)" }
            },
            "required": ["command"]
        })
    }

    fn required_params(&self) -> &[&str] {
        &["command"]
    }

    fn display_summary(&self, args: &Value) -> String {
        format!("$ {}", args["command"].as_str().unwrap_or("?"))
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    async fn execute(&self, call: &ToolCall, cancel: &CancellationToken) -> ToolOutput {
        let args = match ToolArgs::new(&call.args) {
            Ok(a) => a,
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };
        let command = match args.require_str_capped("command", 8192) {
            Ok(c) => c,
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };

        debug!(command = %command, "run_command");

        let child = match tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(c) => c,
            Err(e) => return ToolOutput::err(&call.id, format!("cannot spawn shell: {e}")),
        };

        // kill_on_drop reaps the child when the wait future is dropped by
        // the cancellation arm.
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return ToolOutput::err(&call.id, "command cancelled");
            }
            out = child.wait_with_output() => match out {
                Ok(o) => o,
                Err(e) => return ToolOutput::err(&call.id, format!("command failed: {e}")),
            },
        };

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

        // Non-zero exit is still a successful *tool* execution; the model
        // decides what a failing command means.
        let code = output.status.code().unwrap_or(-1);
        ToolOutput::ok(&call.id, format!("exit {code}\n{text}"))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn tool(dir: &std::path::Path) -> RunCommandTool {
        RunCommandTool { root: dir.to_path_buf(), timeout_secs: 30 }
    }

    fn call(args: Value) -> ToolCall {
        ToolCall { id: "rc-1".into(), name: "run_command".into(), args }
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let t = tool(dir.path());
        let out = t
            .execute(&call(json!({"command": "echo hello"})), &CancellationToken::new())
            .await;
        assert!(out.success());
        assert!(out.content.starts_with("exit 0"));
        assert!(out.content.contains("hello"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_in_content() {
        let dir = tempfile::tempdir().unwrap();
        let t = tool(dir.path());
        let out = t
            .execute(&call(json!({"command": "exit 3"})), &CancellationToken::new())
            .await;
        assert!(out.content.starts_with("exit 3"));
    }

    #[tokio::test]
    async fn runs_in_workspace_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("probe.txt"), "").unwrap();
        let t = tool(dir.path());
        let out = t
            .execute(&call(json!({"command": "ls"})), &CancellationToken::new())
            .await;
        assert!(out.content.contains("probe.txt"));
    }

    #[tokio::test]
    async fn cancellation_kills_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let t = tool(dir.path());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = t
            .execute(&call(json!({"command": "sleep 30"})), &cancel)
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("cancelled"));
    }
}
