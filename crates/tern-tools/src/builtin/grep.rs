// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::tool::{Tool, ToolCall, ToolOutput};
use crate::validate::sanitize_path;
use crate::ToolArgs;

const MAX_RESULTS: u64 = 200;
const MAX_PATTERN_LEN: usize = 500;
const MAX_FILE_BYTES: u64 = 2 * 1024 * 1024;

pub struct GrepTool {
    pub root: PathBuf,
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search workspace files with a regular expression. Returns matching \
         lines as 'path:line: text', capped at max_results."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Regular expression" },
                "path": { "type": "string", "description": "Workspace-relative directory to search (default: root)" },
                "max_results": { "type": "integer", "description": "Result cap, 1-200 (default 50)" }
            },
            "required": ["pattern"]
        })
    }

    fn required_params(&self) -> &[&str] {
        &["pattern"]
    }

    fn display_summary(&self, args: &Value) -> String {
        format!("grep {:?}", args["pattern"].as_str().unwrap_or("?"))
    }

    fn concurrency_safe(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall, cancel: &CancellationToken) -> ToolOutput {
        let args = match ToolArgs::new(&call.args) {
            Ok(a) => a,
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };
        let pattern = match args.require_str_capped("pattern", MAX_PATTERN_LEN) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };
        let max_results = match args.opt_u64_in("max_results", 1, MAX_RESULTS) {
            Ok(n) => n.unwrap_or(50) as usize,
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };
        let rel = args.str_or("path", ".");
        let search_root = match sanitize_path(&self.root, rel) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        let re = match regex::Regex::new(pattern) {
            Ok(r) => r,
            Err(e) => return ToolOutput::err(&call.id, format!("invalid pattern: {e}")),
        };

        let mut matches: Vec<String> = Vec::new();
        'files: for entry in WalkDir::new(&search_root)
            .into_iter()
            .filter_entry(|e| {
                if e.depth() == 0 {
                    return true; // never filter the search root itself
                }
                let name = e.file_name().to_string_lossy();
                !name.starts_with('.') && name != "target" && name != "node_modules"
            })
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
        {
            if cancel.is_cancelled() {
                return ToolOutput::err(&call.id, "search cancelled");
            }
            if entry.metadata().map(|m| m.len()).unwrap_or(0) > MAX_FILE_BYTES {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(entry.path()) else {
                continue; // not UTF-8 text
            };
            let display = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .to_string();
            for (idx, line) in content.lines().enumerate() {
                if re.is_match(line) {
                    matches.push(format!("{display}:{}: {}", idx + 1, line.trim_end()));
                    if matches.len() >= max_results {
                        break 'files;
                    }
                }
            }
        }

        if matches.is_empty() {
            ToolOutput::ok(&call.id, "no matches")
        } else {
            ToolOutput::ok(&call.id, matches.join("\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn call(args: Value) -> ToolCall {
        ToolCall { id: "g-1".into(), name: "grep".into(), args }
    }

    #[tokio::test]
    async fn finds_matching_lines_with_location() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn alpha() {}\nfn beta() {}\n").unwrap();
        let t = GrepTool { root: dir.path().to_path_buf() };
        let out = t
            .execute(&call(json!({"pattern": "beta"})), &CancellationToken::new())
            .await;
        assert!(out.success());
        assert_eq!(out.content, "a.rs:2: fn beta() {}");
    }

    #[tokio::test]
    async fn no_matches_is_success() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "nothing here\n").unwrap();
        let t = GrepTool { root: dir.path().to_path_buf() };
        let out = t
            .execute(&call(json!({"pattern": "zzz"})), &CancellationToken::new())
            .await;
        assert!(out.success());
        assert_eq!(out.content, "no matches");
    }

    #[tokio::test]
    async fn invalid_regex_is_tool_error() {
        let dir = tempfile::tempdir().unwrap();
        let t = GrepTool { root: dir.path().to_path_buf() };
        let out = t
            .execute(&call(json!({"pattern": "[unclosed"})), &CancellationToken::new())
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("invalid pattern"));
    }

    #[tokio::test]
    async fn result_cap_respected() {
        let dir = tempfile::tempdir().unwrap();
        let many = "match\n".repeat(100);
        std::fs::write(dir.path().join("m.txt"), many).unwrap();
        let t = GrepTool { root: dir.path().to_path_buf() };
        let out = t
            .execute(
                &call(json!({"pattern": "match", "max_results": 5})),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(out.content.lines().count(), 5);
    }
}
