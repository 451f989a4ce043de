// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatchError {
    /// The patch text could not be parsed as the local dialect.
    #[error("patch parse error: {0}")]
    Parse(String),

    /// A hunk's context anchor was not found in the target file.
    #[error("anchor not found in {file}: {anchor:?}")]
    AnchorNotFound { file: String, anchor: String },

    /// The anchor was found but the hunk's context/deletion lines did not
    /// match the file.
    #[error("hunk context does not match {file} near {anchor:?}")]
    ContextMismatch { file: String, anchor: String },

    /// The remote fast-apply service returned an empty updated file.
    #[error("remote patch service returned empty content")]
    RemoteEmpty,

    /// Remote service failure.  `retriable` is true for 429/5xx, timeouts,
    /// and network errors — the conditions the Auto fallback acts on.
    #[error("remote patch service error: {message}")]
    Remote {
        status: Option<u16>,
        message: String,
        retriable: bool,
    },

    /// No remote endpoint is configured but the Remote strategy was chosen.
    #[error("remote patch strategy requires a configured endpoint")]
    NoRemoteConfigured,

    /// A free-form edit could not be turned into a local patch.
    #[error("cannot synthesize a local patch: {0}")]
    CannotSynthesize(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cancelled")]
    Cancelled,
}

impl PatchError {
    /// Whether the Auto strategy may fall back to the local patcher after
    /// this remote failure.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            PatchError::Remote { retriable: true, .. } | PatchError::RemoteEmpty
        )
    }
}
