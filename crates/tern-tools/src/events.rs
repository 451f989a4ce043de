// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
/// Events emitted by the tool runtime.  Subscribers register a sender with
/// [`crate::ToolRegistry::subscribe`]; delivery is best-effort (a full or
/// closed subscriber never blocks execution).
#[derive(Debug, Clone)]
pub enum ToolEvent {
    /// Emitted before a tool starts executing.
    CallStarted {
        name: String,
        /// Raw JSON rendering of the arguments as received from the model.
        args_json: String,
    },
    /// Emitted after a tool finishes (success or error).
    CallFinished {
        name: String,
        is_error: bool,
        elapsed_ms: u64,
    },
}
