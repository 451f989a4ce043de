// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Deterministic providers for tests.  No network access.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use tokio_util::sync::CancellationToken;

use crate::provider::ResponseStream;
use crate::{
    AssistantTurn, CompletionRequest, FinishReason, ModelError, ResponseEvent, Role,
    ToolCallRequest,
};

/// Mock provider that echoes the last user message back as the assistant
/// response.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl crate::ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn create(
        &self,
        req: CompletionRequest,
        _cancel: &CancellationToken,
    ) -> Result<AssistantTurn, ModelError> {
        let reply = last_user_text(&req);
        Ok(AssistantTurn {
            content: format!("MOCK: {reply}"),
            tool_calls: vec![],
            finish: Some(FinishReason::Stop),
        })
    }

    async fn stream(
        &self,
        req: CompletionRequest,
        _cancel: &CancellationToken,
    ) -> Result<ResponseStream, ModelError> {
        let reply = last_user_text(&req);
        let events: Vec<Result<ResponseEvent, ModelError>> = vec![
            Ok(ResponseEvent::TextDelta(format!("MOCK: {reply}"))),
            Ok(ResponseEvent::Finish(FinishReason::Stop)),
            Ok(ResponseEvent::Done),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

fn last_user_text(req: &CompletionRequest) -> String {
    req.messages
        .iter()
        .rev()
        .find(|m| matches!(m.role, Role::User))
        .and_then(|m| m.as_text())
        .unwrap_or("[no input]")
        .to_string()
}

/// A pre-scripted provider.  Each call to `stream`/`create` pops the next
/// response script from the front of the queue, so tests can specify exact
/// event sequences — including tool calls and finish reasons.
pub struct ScriptedProvider {
    scripts: Arc<Mutex<Vec<Vec<ResponseEvent>>>>,
    /// The last `CompletionRequest` seen by this provider.  Written on each
    /// call so tests can inspect what was sent.
    pub last_request: Arc<Mutex<Option<CompletionRequest>>>,
    /// Optional per-call delay, for tests that need controllable timing.
    delay: Option<std::time::Duration>,
}

impl ScriptedProvider {
    /// Build a provider from an ordered list of response scripts.
    pub fn new(scripts: Vec<Vec<ResponseEvent>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            last_request: Arc::new(Mutex::new(None)),
            delay: None,
        }
    }

    /// Sleep this long before answering each call.
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Convenience: provider that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![Self::text_script(reply)])
    }

    /// A script emitting one text reply ending with `finish_reason: stop`.
    pub fn text_script(reply: impl Into<String>) -> Vec<ResponseEvent> {
        vec![
            ResponseEvent::TextDelta(reply.into()),
            ResponseEvent::Finish(FinishReason::Stop),
            ResponseEvent::Done,
        ]
    }

    /// A script emitting one tool call ending with `finish_reason: tool_calls`.
    pub fn tool_call_script(
        id: impl Into<String>,
        name: impl Into<String>,
        args_json: impl Into<String>,
    ) -> Vec<ResponseEvent> {
        vec![
            ResponseEvent::ToolCallDelta {
                index: 0,
                id: id.into(),
                name: name.into(),
                arguments: args_json.into(),
            },
            ResponseEvent::Finish(FinishReason::ToolCalls),
            ResponseEvent::Done,
        ]
    }

    /// Convenience: a tool call on the first round, then a text reply.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            Self::tool_call_script(tool_id, tool_name, args_json),
            Self::text_script(final_text),
        ])
    }

    fn next_script(&self) -> Vec<ResponseEvent> {
        let mut scripts = self.scripts.lock().unwrap();
        if scripts.is_empty() {
            // Default fallback when all scripts are consumed
            vec![
                ResponseEvent::TextDelta("[no more scripts]".into()),
                ResponseEvent::Finish(FinishReason::Stop),
                ResponseEvent::Done,
            ]
        } else {
            scripts.remove(0)
        }
    }
}

#[async_trait]
impl crate::ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted-mock"
    }
    fn model_name(&self) -> &str {
        "scripted-mock-model"
    }

    async fn create(
        &self,
        req: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<AssistantTurn, ModelError> {
        *self.last_request.lock().unwrap() = Some(req);
        if let Some(d) = self.delay {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ModelError::Cancelled),
                _ = tokio::time::sleep(d) => {}
            }
        }
        let mut content = String::new();
        let mut tool_calls: Vec<ToolCallRequest> = Vec::new();
        let mut finish = None;
        for ev in self.next_script() {
            match ev {
                ResponseEvent::TextDelta(t) => content.push_str(&t),
                ResponseEvent::ToolCallDelta { id, name, arguments, .. } => {
                    tool_calls.push(ToolCallRequest { id, name, arguments });
                }
                ResponseEvent::Finish(f) => finish = Some(f),
                _ => {}
            }
        }
        Ok(AssistantTurn { content, tool_calls, finish })
    }

    async fn stream(
        &self,
        req: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<ResponseStream, ModelError> {
        *self.last_request.lock().unwrap() = Some(req);
        if let Some(d) = self.delay {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ModelError::Cancelled),
                _ = tokio::time::sleep(d) => {}
            }
        }
        let wrapped: Vec<Result<ResponseEvent, ModelError>> =
            self.next_script().into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(wrapped)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
