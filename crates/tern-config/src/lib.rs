// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
mod loader;
mod paths;
mod schema;
mod secrets;

pub use loader::{load, save_section, write_atomic};
pub use paths::{data_dir, metrics_path, workspace_settings_path};
pub use schema::{
    AgentConfig, Config, OrchestratorConfig, PatchConfig, PatchStrategy, ToolsConfig,
};
pub use secrets::{decrypt_secret, encrypt_secret, resolve_api_key};
