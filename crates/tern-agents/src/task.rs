// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Task lifecycle: `Queued` on hand-off, `Running` while the assigned
/// agent's loop is on it, then exactly one terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Queued => write!(f, "queued"),
            TaskState::Running => write!(f, "running"),
            TaskState::Completed => write!(f, "completed"),
            TaskState::Failed => write!(f, "failed"),
            TaskState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A unit of work handed off to a sub-agent.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub description: String,
    pub context: Option<serde_json::Map<String, serde_json::Value>>,
    pub state: TaskState,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Published when the assigned agent's loop returns a terminal result.
/// A tool failure inside the sub-agent surfaces here as `success = false`,
/// never as an orchestrator error.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub success: bool,
    pub text: String,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}
