// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::tool::{Tool, ToolCall, ToolOutput};
use crate::validate::{cap_input, sanitize_path, MAX_INPUT_LEN};
use crate::ToolArgs;

pub struct ReadFileTool {
    pub root: PathBuf,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a UTF-8 text file from the workspace. Returns the file content, \
         optionally restricted to a line range."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Workspace-relative file path" },
                "start_line": { "type": "integer", "description": "1-based first line (optional)" },
                "end_line": { "type": "integer", "description": "1-based last line, inclusive (optional)" }
            },
            "required": ["path"]
        })
    }

    fn required_params(&self) -> &[&str] {
        &["path"]
    }

    fn display_summary(&self, args: &Value) -> String {
        format!("read {}", args["path"].as_str().unwrap_or("?"))
    }

    fn concurrency_safe(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall, _cancel: &CancellationToken) -> ToolOutput {
        let args = match ToolArgs::new(&call.args) {
            Ok(a) => a,
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };
        let rel = match args.require_path("path") {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };
        let path = match sanitize_path(&self.root, rel) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e),
        };

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => return ToolOutput::err(&call.id, format!("cannot read {rel}: {e}")),
        };
        if let Err(e) = cap_input(&content, MAX_INPUT_LEN) {
            return ToolOutput::err(&call.id, format!("{rel}: {e}"));
        }

        let start = args.u64_or("start_line", 1).max(1) as usize;
        let end = args.u64_or("end_line", u64::MAX) as usize;
        if start > 1 || end < usize::MAX {
            let slice: Vec<&str> = content
                .lines()
                .skip(start - 1)
                .take(end.saturating_sub(start - 1))
                .collect();
            return ToolOutput::ok(&call.id, slice.join("\n"));
        }
        ToolOutput::ok(&call.id, content)
    }
}
