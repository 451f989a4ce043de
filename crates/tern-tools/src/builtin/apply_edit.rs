// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tern_config::PatchStrategy;
use tern_patch::{PatchEngine, PatchRequest};

use crate::tool::{Tool, ToolCall, ToolOutput};
use crate::ToolArgs;

/// The model-facing entry point to the patch engine.
pub struct ApplyEditTool {
    pub engine: Arc<PatchEngine>,
}

#[async_trait]
impl Tool for ApplyEditTool {
    fn name(&self) -> &str {
        "apply_edit"
    }

    fn description(&self) -> &str {
        "Apply an edit to a file. The edit is either a structured patch \
         (*** Update File: / *** Add File: / *** Delete File: sections with \
         @@ anchor @@ hunks of '+', '-' and ' ' lines) or a free-form edit \
         using '... existing code ...' sentinels around the changed region. \
         Returns a one-line-per-file summary of applied changes."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "target_file": { "type": "string", "description": "Workspace-relative file to edit" },
                "instructions": { "type": "string", "description": "One sentence describing the intent of the edit" },
                "code_edit": { "type": "string", "description": "The edit: a structured patch or a sentinel-delimited fragment" },
                "strategy": { "type": "string", "enum": ["auto", "remote", "local"], "description": "Engine selection (default auto)" },
                "dry_run": { "type": "boolean", "description": "Validate without writing (default false)" }
            },
            "required": ["target_file", "instructions", "code_edit"]
        })
    }

    fn required_params(&self) -> &[&str] {
        &["target_file", "instructions", "code_edit"]
    }

    fn display_summary(&self, args: &Value) -> String {
        format!("edit {}", args["target_file"].as_str().unwrap_or("?"))
    }

    fn timeout(&self) -> std::time::Duration {
        // Remote apply plus local fallback can take two service round-trips.
        std::time::Duration::from_secs(90)
    }

    async fn execute(&self, call: &ToolCall, cancel: &CancellationToken) -> ToolOutput {
        let args = match ToolArgs::new(&call.args) {
            Ok(a) => a,
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };
        let target_file = match args.require_path("target_file") {
            Ok(p) => p.to_string(),
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };
        let instructions = match args.require_text("instructions") {
            Ok(i) => i.to_string(),
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };
        let code_edit = match args.require_text("code_edit") {
            Ok(c) => c.to_string(),
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };
        let strategy = match args.str_or("strategy", "auto") {
            "auto" => PatchStrategy::Auto,
            "remote" => PatchStrategy::Remote,
            "local" => PatchStrategy::Local,
            other => {
                return ToolOutput::err(&call.id, format!("unknown strategy: {other}"))
            }
        };
        let dry_run = args.bool_or("dry_run", false);

        debug!(target = %target_file, %strategy, dry_run, "apply_edit");

        let request = PatchRequest {
            target_file,
            instructions,
            code_edit,
            strategy,
            dry_run,
        };
        match self.engine.apply(request, cancel).await {
            Ok(outcome) => {
                let mut summary = outcome.summary;
                if outcome.fallback_used {
                    summary.push_str("\n(remote unavailable; applied with the local patcher)");
                }
                if dry_run {
                    summary.push_str("\n(dry run; nothing written)");
                }
                ToolOutput::ok(&call.id, summary)
            }
            Err(e) => ToolOutput::err(&call.id, format!("patch error: {e}")),
        }
    }
}
