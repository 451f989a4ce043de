// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Validation primitives used by the tool runtime and individual tools.
//!
//! All functions are pure; failures come back as readable strings that end
//! up inside `ToolOutput::err` rather than as transport errors.

use std::path::{Component, Path, PathBuf};

/// Longest accepted path argument, in characters.
pub const MAX_PATH_LEN: usize = 260;
/// Default cap for free-form text inputs.
pub const MAX_INPUT_LEN: usize = 1024 * 1024;

/// Resolve `raw` against `root`, rejecting anything that could escape the
/// workspace: `..` components, `~` expansion, and absolute paths outside
/// `root`.
pub fn sanitize_path(root: &Path, raw: &str) -> Result<PathBuf, String> {
    if raw.is_empty() {
        return Err("path is empty".into());
    }
    if raw.len() > MAX_PATH_LEN {
        return Err(format!("path exceeds {MAX_PATH_LEN} characters"));
    }
    if raw.starts_with('~') {
        return Err("home-relative paths are not allowed".into());
    }
    let candidate = Path::new(raw);
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err("path must not contain '..'".into());
    }
    let joined = if candidate.is_absolute() {
        // Absolute paths are allowed only when already inside the root.
        if !candidate.starts_with(root) {
            return Err(format!(
                "absolute path escapes workspace root {}",
                root.display()
            ));
        }
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };
    Ok(joined)
}

/// Shape check for known API-key formats: a recognized prefix
/// (`sk-`, `sk-or-`, `sk-ant-`) and a minimum length of 20.
pub fn valid_api_key(key: &str) -> bool {
    key.len() >= 20 && (key.starts_with("sk-or-") || key.starts_with("sk-ant-") || key.starts_with("sk-"))
}

/// Validate a URL string; when `require_https` is set, only `https://` is
/// accepted.
pub fn validate_url(url: &str, require_https: bool) -> Result<(), String> {
    let rest = if let Some(r) = url.strip_prefix("https://") {
        r
    } else if let Some(r) = url.strip_prefix("http://") {
        if require_https {
            return Err("https is required".into());
        }
        r
    } else {
        return Err("url must start with http:// or https://".into());
    };
    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    if host.is_empty() {
        return Err("url has no host".into());
    }
    Ok(())
}

/// Enforce the free-form input cap.
pub fn cap_input(input: &str, max: usize) -> Result<(), String> {
    if input.len() > max {
        return Err(format!("input exceeds {max} bytes ({} given)", input.len()));
    }
    Ok(())
}

/// Agent names: alphanumeric plus `-` and `_`, 1–64 characters.
pub fn valid_agent_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
