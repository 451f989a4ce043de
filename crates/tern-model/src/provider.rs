// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use tokio_util::sync::CancellationToken;

use crate::{AssistantTurn, CompletionRequest, ModelError, ResponseEvent};

pub type ResponseStream =
    Pin<Box<dyn Stream<Item = Result<ResponseEvent, ModelError>> + Send>>;

/// A chat-completions backend.  Implementations are shared across agents and
/// must be concurrency-safe.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable provider name for status display.
    fn name(&self) -> &str;

    /// Model identifier forwarded to the API.
    fn model_name(&self) -> &str;

    /// Non-streaming completion.  Cancelling `cancel` aborts the request and
    /// yields [`ModelError::Cancelled`].
    async fn create(
        &self,
        req: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<AssistantTurn, ModelError>;

    /// Streaming completion.  The returned stream ends with
    /// [`ResponseEvent::Done`]; cancelling `cancel` aborts the underlying
    /// connection and the stream yields [`ModelError::Cancelled`] as its
    /// final item.
    async fn stream(
        &self,
        req: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<ResponseStream, ModelError>;
}
