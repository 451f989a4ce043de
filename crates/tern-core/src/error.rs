// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

use tern_model::ModelError;

/// Errors surfaced by an agent run.  Tool failures never appear here — they
/// are reified into tool messages and the loop continues.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Transport/provider/protocol failure from the chat API.  History is
    /// preserved up to the last successful append.
    #[error(transparent)]
    Model(ModelError),

    /// The loop itself violated its contract, e.g. the tool-call round
    /// bound was exceeded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Context cancellation observed.  Any partial assistant text streamed
    /// before the cancellation has been committed to history.
    #[error("cancelled")]
    Cancelled,
}

impl From<ModelError> for AgentError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::Cancelled => AgentError::Cancelled,
            other => AgentError::Model(other),
        }
    }
}
