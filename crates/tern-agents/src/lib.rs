// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
mod manager;
mod task;
mod tools;

pub use manager::{AgentManager, AgentOverrides, AgentStatusInfo, OrchestratorError};
pub use task::{Task, TaskResult, TaskState};
pub use tools::{
    register_orchestration_tools, AgentStatusTool, GetTaskResultTool, HandOffTool,
    SpawnAgentTool, TerminateAgentTool, WaitForAgentsTool,
};
