// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

/// User-scoped application data directory (`<data_dir>/tern`).
///
/// Falls back to the current directory when the platform provides no data
/// directory (containers, stripped-down CI images).
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tern")
}

/// Workspace-local settings file: `./.tern/settings.json`.
pub fn workspace_settings_path() -> PathBuf {
    PathBuf::from(".tern/settings.json")
}

/// Append-only diff metrics log: `<data_dir>/tern/diff-metrics.jsonl`.
pub fn metrics_path() -> PathBuf {
    data_dir().join("diff-metrics.jsonl")
}

/// Ordered list of config file locations searched from lowest to highest
/// priority.  Later files override earlier ones.
pub(crate) fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. System-wide default
    paths.push(PathBuf::from("/etc/tern/settings.json"));

    // 2. User config / data
    if let Some(cfg) = dirs::config_dir() {
        paths.push(cfg.join("tern/settings.json"));
    }
    paths.push(data_dir().join("agent-config.json"));
    paths.push(data_dir().join("morph-config.json"));

    // 3. Workspace-local
    paths.push(workspace_settings_path());

    paths
}
