// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! OpenAI-compatible chat-completions driver.
//!
//! Speaks the standard `/chat/completions` wire format, streaming or not.
//! SSE frames may be split across TCP packets, so decoding maintains a
//! persistent line buffer and only parses complete `\n`-terminated lines.
//!
//! Error mapping:
//! - network failure → [`ModelError::Transport`]
//! - HTTP ≥ 400 with a parseable `{ "error": { ... } }` envelope →
//!   [`ModelError::Provider`]
//! - HTTP ≥ 400 otherwise → [`ModelError::Http`] with a ≤ 2 KiB snippet
//! - malformed SSE payload → [`ModelError::Protocol`]
//! - cancellation → [`ModelError::Cancelled`]

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::snippet;
use crate::provider::ResponseStream;
use crate::{
    AssistantTurn, CompletionRequest, FinishReason, Message, MessageContent, ModelError,
    ResponseEvent, Role, ToolCallRequest,
};

/// OpenAI-compatible chat completion provider.
pub struct OpenAICompatProvider {
    /// Provider id returned by `ModelProvider::name()`.
    driver_name: &'static str,
    /// Model id forwarded to the API.
    model: String,
    /// API key (pre-resolved from env or config).
    api_key: Option<String>,
    /// Full chat completions URL, e.g. `https://openrouter.ai/api/v1/chat/completions`.
    chat_url: String,
    client: reqwest::Client,
    /// Additional HTTP headers (e.g. `HTTP-Referer` / `X-Title` attribution).
    extra_headers: Vec<(String, String)>,
}

impl OpenAICompatProvider {
    /// Construct a provider from its base URL and auth configuration.
    ///
    /// `base_url` ends **before** `/chat/completions`, e.g.
    /// `https://openrouter.ai/api/v1`.
    pub fn new(
        driver_name: &'static str,
        model: impl Into<String>,
        api_key: Option<String>,
        base_url: &str,
    ) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            driver_name,
            model: model.into(),
            api_key,
            chat_url: format!("{base}/chat/completions"),
            client: reqwest::Client::new(),
            extra_headers: Vec::new(),
        }
    }

    /// Attach attribution headers sent on every request.
    pub fn with_attribution(mut self, referer: &str, title: &str) -> Self {
        self.extra_headers
            .push(("HTTP-Referer".into(), referer.into()));
        self.extra_headers.push(("X-Title".into(), title.into()));
        self
    }

    fn build_body(&self, req: &CompletionRequest) -> Value {
        let messages = build_wire_messages(&req.messages);
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": req.temperature,
            "top_p": req.top_p,
            "max_tokens": req.max_tokens,
            "stream": req.stream,
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }
        body
    }

    fn build_request(&self, body: &Value, accept_sse: bool) -> reqwest::RequestBuilder {
        let mut http_req = self.client.post(&self.chat_url).json(body);
        if let Some(key) = &self.api_key {
            http_req = http_req.bearer_auth(key);
        }
        if accept_sse {
            http_req = http_req.header("Accept", "text/event-stream");
        }
        for (name, val) in &self.extra_headers {
            http_req = http_req.header(name.as_str(), val.as_str());
        }
        http_req
    }

    /// Classify a non-2xx response into `Provider` or `Http`.
    async fn error_from_response(&self, resp: reqwest::Response) -> ModelError {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        parse_error_envelope(status, &body)
    }
}

/// Parse the provider error envelope `{ "error": { code, message, metadata } }`.
/// Falls back to a raw `Http` error with a truncated snippet.
fn parse_error_envelope(status: u16, body: &str) -> ModelError {
    if let Ok(v) = serde_json::from_str::<Value>(body) {
        if let Some(err) = v.get("error").filter(|e| e.is_object()) {
            let message = err
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("")
                .to_string();
            if !message.is_empty() {
                let code = err.get("code").map(|c| match c.as_str() {
                    Some(s) => s.to_string(),
                    None => c.to_string(),
                });
                let provider = err
                    .get("metadata")
                    .and_then(|m| m.get("provider_name"))
                    .and_then(|p| p.as_str())
                    .map(str::to_string);
                return ModelError::Provider {
                    status,
                    code,
                    message,
                    provider,
                };
            }
        }
    }
    ModelError::Http {
        status,
        snippet: snippet(body),
    }
}

#[async_trait]
impl crate::ModelProvider for OpenAICompatProvider {
    fn name(&self) -> &str {
        self.driver_name
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn create(
        &self,
        req: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<AssistantTurn, ModelError> {
        let mut req = req;
        req.stream = false;
        let body = self.build_body(&req);
        debug!(
            driver = %self.driver_name,
            model = %self.model,
            message_count = req.messages.len(),
            "sending completion request"
        );

        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ModelError::Cancelled),
            r = self.build_request(&body, false).send() => {
                r.map_err(|e| ModelError::Transport(e.to_string()))?
            }
        };

        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }

        let v: Value = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ModelError::Cancelled),
            r = resp.json() => r.map_err(|e| ModelError::Transport(e.to_string()))?,
        };
        parse_completion_response(&v)
    }

    async fn stream(
        &self,
        req: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<ResponseStream, ModelError> {
        let mut req = req;
        req.stream = true;
        let body = self.build_body(&req);
        debug!(
            driver = %self.driver_name,
            model = %self.model,
            tool_count = req.tools.len(),
            message_count = req.messages.len(),
            "opening completion stream"
        );

        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ModelError::Cancelled),
            r = self.build_request(&body, true).send() => {
                r.map_err(|e| ModelError::Transport(e.to_string()))?
            }
        };

        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }

        let byte_stream = resp.bytes_stream();
        // SSE events can be split across multiple TCP packets.  Maintain a
        // line buffer across chunks; emit events only for complete lines.
        let event_stream = byte_stream
            .scan(String::new(), |buf, chunk| {
                let events: Vec<Result<ResponseEvent, ModelError>> = match chunk {
                    Ok(b) => {
                        buf.push_str(&String::from_utf8_lossy(&b));
                        drain_complete_sse_lines(buf)
                    }
                    Err(e) => vec![Err(ModelError::Transport(e.to_string()))],
                };
                std::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        // Cancellation aborts the connection by dropping the inner stream,
        // then surfaces a single terminal `Cancelled` item.
        let cancelled = cancel.clone();
        let tail_token = cancel.clone();
        let stream = event_stream
            .take_until(Box::pin(async move { cancelled.cancelled().await }))
            .chain(
                futures::stream::once(async move {
                    if tail_token.is_cancelled() {
                        Some(Err(ModelError::Cancelled))
                    } else {
                        None
                    }
                })
                .filter_map(std::future::ready),
            );

        Ok(Box::pin(stream))
    }
}

/// Parse a non-streaming `{choices:[{message, finish_reason}]}` body.
fn parse_completion_response(v: &Value) -> Result<AssistantTurn, ModelError> {
    let choice = v
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| ModelError::Protocol("response has no choices".into()))?;
    let message = choice
        .get("message")
        .ok_or_else(|| ModelError::Protocol("choice has no message".into()))?;

    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string();

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(|t| t.as_array()) {
        for tc in calls {
            tool_calls.push(ToolCallRequest {
                id: tc["id"].as_str().unwrap_or("").to_string(),
                name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                arguments: tc["function"]["arguments"]
                    .as_str()
                    .unwrap_or("")
                    .to_string(),
            });
        }
    }

    let finish = match choice.get("finish_reason").and_then(|f| f.as_str()) {
        Some(s) => Some(
            FinishReason::parse(s)
                .ok_or_else(|| ModelError::Protocol(format!("unknown finish_reason: {s}")))?,
        ),
        None => None,
    };

    Ok(AssistantTurn {
        content,
        tool_calls,
        finish,
    })
}

/// Drain all complete `\n`-terminated SSE lines from `buf`.
///
/// Any trailing incomplete line is left in `buf` so it can be extended by
/// the next TCP chunk.
pub(crate) fn drain_complete_sse_lines(
    buf: &mut String,
) -> Vec<Result<ResponseEvent, ModelError>> {
    let mut events = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        // Strip the optional Windows-style \r before \n.
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        // Advance buffer past the consumed line including the \n.
        *buf = buf[nl_pos + 1..].to_string();
        events.extend(parse_sse_data_line(&line));
    }
    events
}

/// Parse a single complete SSE line into zero or more [`ResponseEvent`]s.
///
/// Empty lines (frame terminators) and comment lines yield nothing.
fn parse_sse_data_line(line: &str) -> Vec<Result<ResponseEvent, ModelError>> {
    let Some(data) = line.strip_prefix("data:") else {
        return Vec::new();
    };
    let data = data.trim();
    if data.is_empty() {
        return Vec::new();
    }
    if data == "[DONE]" {
        return vec![Ok(ResponseEvent::Done)];
    }
    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            return vec![Err(ModelError::Protocol(format!(
                "malformed SSE payload: {e}"
            )))]
        }
    };
    parse_sse_chunk(&v)
}

/// Decode one SSE JSON payload.  A single chunk may carry several tool-call
/// deltas plus a finish reason, so this returns a list.
fn parse_sse_chunk(v: &Value) -> Vec<Result<ResponseEvent, ModelError>> {
    let mut events = Vec::new();

    // Usage-only chunk (final stats when stream_options.include_usage is on).
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        events.push(Ok(ResponseEvent::Usage(crate::Usage {
            input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
        })));
        return events;
    }

    let Some(choice) = v.get("choices").and_then(|c| c.get(0)) else {
        return events;
    };
    let delta = &choice["delta"];

    if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
        if !text.is_empty() {
            events.push(Ok(ResponseEvent::TextDelta(text.to_string())));
        }
    }

    if let Some(tool_calls) = delta.get("tool_calls").and_then(|t| t.as_array()) {
        for tc in tool_calls {
            events.push(Ok(ResponseEvent::ToolCallDelta {
                index: tc["index"].as_u64().unwrap_or(0) as u32,
                id: tc["id"].as_str().unwrap_or("").to_string(),
                name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                arguments: tc["function"]["arguments"]
                    .as_str()
                    .unwrap_or("")
                    .to_string(),
            }));
        }
    }

    if let Some(reason) = choice.get("finish_reason").and_then(|f| f.as_str()) {
        match FinishReason::parse(reason) {
            Some(f) => events.push(Ok(ResponseEvent::Finish(f))),
            None => events.push(Err(ModelError::Protocol(format!(
                "unknown finish_reason: {reason}"
            )))),
        }
    }

    events
}

fn role_str(r: &Role) -> &'static str {
    match r {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Convert a slice of [`Message`]s into the OpenAI wire-format JSON array.
///
/// **Parallel tool call coalescing**: the wire format requires that all tool
/// calls from one assistant turn appear inside a *single* assistant message
/// as a `tool_calls` array.  Tern stores each tool call as a separate
/// `MessageContent::ToolCall` entry internally, so consecutive `ToolCall`
/// messages are merged into one JSON object here.
pub(crate) fn build_wire_messages(messages: &[Message]) -> Vec<Value> {
    fn tool_call_to_json(tool_call_id: &str, function: &crate::FunctionCall) -> Value {
        json!({
            "id": tool_call_id,
            "type": "function",
            "function": {
                "name": function.name,
                "arguments": function.arguments,
            }
        })
    }

    let mut result: Vec<Value> = Vec::with_capacity(messages.len());
    let mut i = 0;

    while i < messages.len() {
        let m = &messages[i];

        if let MessageContent::ToolCall { tool_call_id, function } = &m.content {
            let mut calls = vec![tool_call_to_json(tool_call_id, function)];
            i += 1;
            while i < messages.len() {
                if let MessageContent::ToolCall { tool_call_id, function } = &messages[i].content {
                    calls.push(tool_call_to_json(tool_call_id, function));
                    i += 1;
                } else {
                    break;
                }
            }
            result.push(json!({ "role": "assistant", "tool_calls": calls }));
            continue;
        }

        let v = match &m.content {
            MessageContent::Text(t) => json!({
                "role": role_str(&m.role),
                "content": t,
            }),
            MessageContent::Structured(value) => json!({
                "role": role_str(&m.role),
                "content": value,
            }),
            MessageContent::ToolCall { .. } => unreachable!("handled above"),
            MessageContent::ToolResult { tool_call_id, name, content } => json!({
                "role": "tool",
                "tool_call_id": tool_call_id,
                "name": name,
                "content": content,
            }),
        };
        result.push(v);
        i += 1;
    }

    result
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
