// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::tool::{Tool, ToolCall, ToolOutput};
use crate::validate::sanitize_path;
use crate::ToolArgs;

pub struct WriteFileTool {
    pub root: PathBuf,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write a UTF-8 text file in the workspace, creating parent directories \
         as needed. Overwrites an existing file."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Workspace-relative file path" },
                "content": { "type": "string", "description": "Full new file content" }
            },
            "required": ["path", "content"]
        })
    }

    fn required_params(&self) -> &[&str] {
        &["path", "content"]
    }

    fn display_summary(&self, args: &Value) -> String {
        format!("write {}", args["path"].as_str().unwrap_or("?"))
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
        let content = match args.require_text("content") {
            Ok(c) => c,
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };
        let path = match sanitize_path(&self.root, rel) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e),
        };

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolOutput::err(&call.id, format!("cannot create {rel}: {e}"));
            }
        }
        match tokio::fs::write(&path, content).await {
            Ok(()) => ToolOutput::ok(&call.id, format!("wrote {} bytes to {rel}", content.len())),
            Err(e) => ToolOutput::err(&call.id, format!("cannot write {rel}: {e}")),
        }
    }
}
