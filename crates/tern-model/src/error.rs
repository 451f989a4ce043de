// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Errors surfaced by the chat transport.  The variants are disjoint by
/// construction: a failure is classified exactly once at the point where it
/// is first observed.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Network-level failure: connect, DNS, TLS, timeout, broken stream.
    #[error("transport error: {0}")]
    Transport(String),

    /// HTTP ≥ 400 with a parseable provider error envelope.
    #[error("provider error {status} ({}): {message}", .code.as_deref().unwrap_or("-"))]
    Provider {
        status: u16,
        code: Option<String>,
        message: String,
        provider: Option<String>,
    },

    /// HTTP ≥ 400 without a parseable envelope.  Carries a payload snippet
    /// truncated to 2 KiB.
    #[error("http error {status}: {snippet}")]
    Http { status: u16, snippet: String },

    /// Malformed SSE frame or unexpected response schema.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Context cancellation observed.  Distinguished from timeouts, which
    /// are `Transport`.
    #[error("cancelled")]
    Cancelled,
}

impl ModelError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ModelError::Cancelled)
    }
}

/// Truncate a payload to at most 2 KiB on a char boundary for error snippets.
pub(crate) fn snippet(body: &str) -> String {
    const MAX: usize = 2048;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}
