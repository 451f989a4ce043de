// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use tern_config::AgentConfig;
use tern_model::{
    CompletionRequest, FinishReason, Message, ModelError, ResponseEvent, ToolSchema,
};
use tern_store::{NewSession, SessionStore};
use tern_tools::{Tool, ToolCall, ToolRegistry};

use crate::events::AgentEvent;
use crate::session::Session;
use crate::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Idle,
    Busy,
    Terminated,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Busy => write!(f, "busy"),
            AgentStatus::Terminated => write!(f, "terminated"),
        }
    }
}

/// A configured wrapper around a chat model with its own history and tool
/// policy.  Owns its session; the loop is linear and single-threaded over it.
pub struct Agent {
    id: Uuid,
    name: String,
    config: Arc<AgentConfig>,
    session: Session,
    tools: Arc<ToolRegistry>,
    model: Arc<dyn tern_model::ModelProvider>,
    store: Arc<dyn SessionStore>,
    status: AgentStatus,
    store_session_id: Option<i64>,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        config: Arc<AgentConfig>,
        model: Arc<dyn tern_model::ModelProvider>,
        tools: Arc<ToolRegistry>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            config,
            session: Session::new(),
            tools,
            model,
            store,
            status: AgentStatus::Idle,
            store_session_id: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> AgentStatus {
        self.status
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Create the persisted session record.  Best-effort: a failing store
    /// never blocks the agent.
    pub async fn init_store_session(&mut self, session_type: &str, parent_id: Option<i64>) {
        match self
            .store
            .create_session(NewSession {
                name: self.name.clone(),
                session_type: session_type.into(),
                parent_id,
                agent_name: self.name.clone(),
                model: self.config.model.clone(),
                system_prompt: self.config.system_prompt.clone(),
                temperature: self.config.temperature,
                max_tokens: self.config.max_tokens,
            })
            .await
        {
            Ok(id) => self.store_session_id = Some(id),
            Err(e) => warn!(agent = %self.name, "session create failed: {e}"),
        }
    }

    /// Run one user turn to completion and return the final assistant text.
    pub async fn execute(
        &mut self,
        user_message: &str,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        self.run(user_message, None, cancel).await
    }

    /// Like [`execute`], but streams [`AgentEvent`]s through `tx` as the run
    /// progresses.  The caller drops the receiver when no longer interested.
    pub async fn execute_stream(
        &mut self,
        user_message: &str,
        tx: mpsc::Sender<AgentEvent>,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        self.run(user_message, Some(tx), cancel).await
    }

    async fn run(
        &mut self,
        user_message: &str,
        tx: Option<mpsc::Sender<AgentEvent>>,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        self.status = AgentStatus::Busy;
        let result = self.run_inner(user_message, &tx, cancel).await;
        self.status = AgentStatus::Idle;
        if result.is_ok() {
            send(&tx, AgentEvent::TurnComplete).await;
        }
        result
    }

    async fn run_inner(
        &mut self,
        user_message: &str,
        tx: &Option<mpsc::Sender<AgentEvent>>,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        if !self.config.maintain_history {
            self.session.retain_system();
        }
        if self.session.messages.is_empty() {
            if let Some(prompt) = &self.config.system_prompt {
                self.append(Message::system(prompt.clone())).await;
            }
        }
        self.append(Message::user(user_message)).await;

        let mut rounds = 0u32;
        let mut last_text = String::new();

        loop {
            rounds += 1;
            if rounds > self.config.max_tool_rounds {
                return Err(AgentError::Protocol(format!(
                    "tool-call round limit ({}) exceeded",
                    self.config.max_tool_rounds
                )));
            }

            let (text, tool_calls) = self.stream_one_turn(tx, cancel).await?;

            if !text.is_empty() {
                last_text = text.clone();
            }

            if tool_calls.is_empty() {
                if !text.is_empty() {
                    self.append(Message::assistant(text)).await;
                }
                return Ok(last_text);
            }

            // Phase 1: commit the assistant tool-call messages, preserving
            // the model's text preamble if it produced one.
            if !text.is_empty() {
                self.append(Message::assistant(text)).await;
            }
            let mut call_msg_ids = Vec::with_capacity(tool_calls.len());
            for tc in &tool_calls {
                let msg_id = self
                    .append(Message::tool_call(&tc.id, &tc.name, &tc.arguments))
                    .await;
                call_msg_ids.push(msg_id);
            }

            // Phase 2: dispatch serially in emission order.  Tool messages
            // land in history in exactly that order.
            for (tc, msg_id) in tool_calls.iter().zip(call_msg_ids) {
                if cancel.is_cancelled() {
                    // No further dispatch, no recursion.
                    return Err(AgentError::Cancelled);
                }
                self.dispatch_one(tc, msg_id, tx, cancel).await;
            }
            // Recurse into the next model turn; termination is a `stop`
            // finish on a tool-free turn.
        }
    }

    /// Call the model once, streaming deltas and assembling tool calls.
    async fn stream_one_turn(
        &mut self,
        tx: &Option<mpsc::Sender<AgentEvent>>,
        cancel: &CancellationToken,
    ) -> Result<(String, Vec<AssembledToolCall>), AgentError> {
        let req = self.build_request();
        debug!(
            agent = %self.name,
            messages = req.messages.len(),
            tools = req.tools.len(),
            "requesting completion"
        );

        let mut stream = self.model.stream(req, cancel).await?;

        let mut current_text = String::new();
        // Keyed by the provider's parallel-tool-call index; fragments for a
        // given index accumulate by concatenation.
        let mut pending: HashMap<u32, PendingToolCall> = HashMap::new();
        let mut finish: Option<FinishReason> = None;

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    // Commit streamed partial text, then surface cancellation.
                    if !current_text.is_empty() {
                        self.append(Message::assistant(current_text)).await;
                    }
                    return Err(AgentError::Cancelled);
                }
                ev = stream.next() => ev,
            };
            let Some(event) = event else { break };

            match event {
                Ok(ResponseEvent::TextDelta(delta)) => {
                    current_text.push_str(&delta);
                    send(tx, AgentEvent::TextDelta(delta)).await;
                }
                Ok(ResponseEvent::ToolCallDelta { index, id, name, arguments }) => {
                    let ptc = pending.entry(index).or_default();
                    if !id.is_empty() {
                        ptc.id = id;
                    }
                    if !name.is_empty() {
                        ptc.name = name;
                    }
                    ptc.arguments.push_str(&arguments);
                    send(tx, AgentEvent::ToolCallDelta).await;
                }
                Ok(ResponseEvent::Finish(reason)) => {
                    finish = Some(reason);
                }
                Ok(ResponseEvent::Usage(_)) => {}
                Ok(ResponseEvent::Done) => break,
                Err(ModelError::Cancelled) => {
                    if !current_text.is_empty() {
                        self.append(Message::assistant(current_text)).await;
                    }
                    return Err(AgentError::Cancelled);
                }
                Err(e) => return Err(AgentError::Model(e)),
            }
        }

        if !current_text.is_empty() {
            send(tx, AgentEvent::TextComplete(current_text.clone())).await;
        }

        // Assemble parallel tool calls ordered by index.  Calls without a
        // name cannot be dispatched and are dropped; an empty id gets a
        // synthetic fallback so the turn can still complete.
        let mut sorted: Vec<(u32, PendingToolCall)> = pending.into_iter().collect();
        sorted.sort_by_key(|(idx, _)| *idx);
        let mut tool_calls = Vec::new();
        for (i, (_, ptc)) in sorted.into_iter().enumerate() {
            if ptc.name.is_empty() {
                warn!(call_id = %ptc.id, "dropping tool call with empty name from model");
                continue;
            }
            let mut tc = AssembledToolCall {
                id: ptc.id,
                name: ptc.name,
                arguments: ptc.arguments,
            };
            if tc.id.is_empty() {
                tc.id = format!("tc_synthetic_{i}");
                warn!(tool = %tc.name, call_id = %tc.id, "tool call had empty id; generated synthetic id");
            }
            tool_calls.push(tc);
        }

        if matches!(finish, Some(FinishReason::Stop)) && !tool_calls.is_empty() {
            // A conforming provider finishes with tool_calls when calls are
            // present; tolerate the mismatch but note it.
            debug!("finish_reason=stop arrived alongside tool calls");
        }

        Ok((current_text, tool_calls))
    }

    /// Execute one tool call and append its tool message.  All failure modes
    /// end up in the tool message; nothing here aborts the loop.
    async fn dispatch_one(
        &mut self,
        tc: &AssembledToolCall,
        call_msg_id: Option<i64>,
        tx: &Option<mpsc::Sender<AgentEvent>>,
        cancel: &CancellationToken,
    ) {
        if !self.tools.contains(&tc.name) {
            let content = format!("Tool '{}' not found", tc.name);
            warn!(agent = %self.name, tool = %tc.name, "unknown tool requested");
            self.append(Message::tool_result(&tc.id, &tc.name, &content))
                .await;
            send(
                tx,
                AgentEvent::ToolCallFinished {
                    call_id: tc.id.clone(),
                    name: tc.name.clone(),
                    output: content,
                    is_error: true,
                },
            )
            .await;
            return;
        }

        let args: Value = if tc.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(&tc.arguments) {
                Ok(v) => v,
                Err(e) => {
                    let content = format!("invalid tool arguments: {e}");
                    self.append(Message::tool_result(&tc.id, &tc.name, &content))
                        .await;
                    send(
                        tx,
                        AgentEvent::ToolCallFinished {
                            call_id: tc.id.clone(),
                            name: tc.name.clone(),
                            output: content,
                            is_error: true,
                        },
                    )
                    .await;
                    return;
                }
            }
        };

        let summary = self
            .tools
            .get(&tc.name)
            .map(|t| t.display_summary(&args))
            .unwrap_or_else(|| tc.name.clone());
        send(
            tx,
            AgentEvent::ToolCallStarted {
                call_id: tc.id.clone(),
                name: tc.name.clone(),
                summary,
            },
        )
        .await;

        // Best-effort persistence around the execution.
        let stored_call_id = match (self.store_session_id, call_msg_id) {
            (Some(session_id), Some(msg_id)) => self
                .store
                .save_tool_call(msg_id, session_id, &tc.name, &tc.arguments, &self.name)
                .await
                .map_err(|e| warn!("tool call persist failed: {e}"))
                .ok(),
            _ => None,
        };

        let call = ToolCall {
            id: tc.id.clone(),
            name: tc.name.clone(),
            args,
        };
        let started = Instant::now();
        let output = self.tools.execute(&call, cancel).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if let Some(stored_id) = stored_call_id {
            let (result, error) = if output.is_error {
                (None, Some(output.content.as_str()))
            } else {
                (Some(output.content.as_str()), None)
            };
            if let Err(e) = self
                .store
                .update_tool_call_result(stored_id, result, error, elapsed_ms)
                .await
            {
                warn!("tool result persist failed: {e}");
            }
        }

        self.append(Message::tool_result(&tc.id, &tc.name, &output.content))
            .await;
        send(
            tx,
            AgentEvent::ToolCallFinished {
                call_id: tc.id.clone(),
                name: tc.name.clone(),
                output: output.content,
                is_error: output.is_error,
            },
        )
        .await;
    }

    fn build_request(&self) -> CompletionRequest {
        let tools: Vec<ToolSchema> = if self.config.enable_tools {
            self.tools
                .schemas(self.config.tool_allowlist.as_deref())
                .into_iter()
                .map(|s| ToolSchema {
                    name: s.name,
                    description: s.description,
                    parameters: s.parameters,
                })
                .collect()
        } else {
            Vec::new()
        };

        let max_messages = self
            .config
            .maintain_history
            .then_some(self.config.max_history_messages)
            .flatten();

        CompletionRequest {
            messages: self.session.request_messages(max_messages),
            tools,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            max_tokens: self.config.max_tokens,
            stream: self.config.stream,
        }
    }

    /// Append to history and persist best-effort.  Returns the store's
    /// message id when persistence succeeded.
    async fn append(&mut self, msg: Message) -> Option<i64> {
        let stored = match self.store_session_id {
            Some(session_id) => match self.store.save_message(session_id, &msg).await {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(agent = %self.name, "message persist failed: {e}");
                    None
                }
            },
            None => None,
        };
        self.session.push(msg);
        stored
    }
}

/// A tool call assembled from streamed fragments; arguments stay a raw JSON
/// string until dispatch.
#[derive(Debug, Clone)]
pub(crate) struct AssembledToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

async fn send(tx: &Option<mpsc::Sender<AgentEvent>>, event: AgentEvent) {
    if let Some(tx) = tx {
        let _ = tx.send(event).await;
    }
}
