// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
/// Events emitted by the agent during a run.  Consumers (terminal loop,
/// front-ends, the orchestrator) subscribe via the sender passed to
/// `Agent::execute_stream`.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A text chunk streamed from the model.
    TextDelta(String),
    /// The full text of one assistant turn, after streaming finishes.
    TextComplete(String),
    /// A tool-call fragment arrived on the stream (no text payload).
    ToolCallDelta,
    /// A tool call is about to execute.
    ToolCallStarted {
        call_id: String,
        name: String,
        summary: String,
    },
    /// A tool call finished.
    ToolCallFinished {
        call_id: String,
        name: String,
        output: String,
        is_error: bool,
    },
    /// The agent finished processing the current user turn.
    TurnComplete,
}
