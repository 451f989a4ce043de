// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Session persistence contract.
//!
//! The agent loop writes sessions, messages, and tool calls through this
//! trait on a best-effort basis: every operation may fail, and callers log
//! failures without letting them reach the loop.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tern_model::Message;

/// Parameters for creating a persisted session.
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub name: String,
    /// "primary" or "sub-agent".
    pub session_type: String,
    /// Parent session for sub-agent hierarchies.
    pub parent_id: Option<i64>,
    pub agent_name: String,
    pub model: String,
    pub system_prompt: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: NewSession) -> anyhow::Result<i64>;

    /// Persist one message; returns a message id that is monotonically
    /// increasing with append order within the store.
    async fn save_message(&self, session_id: i64, message: &Message) -> anyhow::Result<i64>;

    async fn save_tool_call(
        &self,
        message_id: i64,
        session_id: i64,
        tool_name: &str,
        args_json: &str,
        agent_name: &str,
    ) -> anyhow::Result<i64>;

    async fn update_tool_call_result(
        &self,
        tool_call_id: i64,
        result: Option<&str>,
        error: Option<&str>,
        elapsed_ms: u64,
    ) -> anyhow::Result<()>;

    async fn dispose(&self) -> anyhow::Result<()>;
}

// ─── Null store ───────────────────────────────────────────────────────────────

/// Store that discards everything.  Used when persistence is disabled.
#[derive(Default)]
pub struct NullStore;

#[async_trait]
impl SessionStore for NullStore {
    async fn create_session(&self, _session: NewSession) -> anyhow::Result<i64> {
        Ok(0)
    }
    async fn save_message(&self, _session_id: i64, _message: &Message) -> anyhow::Result<i64> {
        Ok(0)
    }
    async fn save_tool_call(
        &self,
        _message_id: i64,
        _session_id: i64,
        _tool_name: &str,
        _args_json: &str,
        _agent_name: &str,
    ) -> anyhow::Result<i64> {
        Ok(0)
    }
    async fn update_tool_call_result(
        &self,
        _tool_call_id: i64,
        _result: Option<&str>,
        _error: Option<&str>,
        _elapsed_ms: u64,
    ) -> anyhow::Result<()> {
        Ok(())
    }
    async fn dispose(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

// ─── In-memory store ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StoredToolCall {
    pub id: i64,
    pub message_id: i64,
    pub session_id: i64,
    pub tool_name: String,
    pub args_json: String,
    pub agent_name: String,
    pub result: Option<String>,
    pub error: Option<String>,
    pub elapsed_ms: Option<u64>,
}

/// In-memory store used by tests and as the default ephemeral backend.
/// Ids are allocated from a single atomic counter, so they are monotonic
/// with append order across all sessions.
#[derive(Default)]
pub struct MemoryStore {
    next_id: AtomicI64,
    sessions: Mutex<HashMap<i64, NewSession>>,
    messages: Mutex<Vec<(i64, i64, Message)>>,
    tool_calls: Mutex<HashMap<i64, StoredToolCall>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Messages saved for one session, in append order.
    pub fn messages_for(&self, session_id: i64) -> Vec<(i64, Message)> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, sid, _)| *sid == session_id)
            .map(|(id, _, m)| (*id, m.clone()))
            .collect()
    }

    pub fn tool_call(&self, id: i64) -> Option<StoredToolCall> {
        self.tool_calls.lock().unwrap().get(&id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, session: NewSession) -> anyhow::Result<i64> {
        let id = self.alloc();
        self.sessions.lock().unwrap().insert(id, session);
        Ok(id)
    }

    async fn save_message(&self, session_id: i64, message: &Message) -> anyhow::Result<i64> {
        let id = self.alloc();
        self.messages
            .lock()
            .unwrap()
            .push((id, session_id, message.clone()));
        Ok(id)
    }

    async fn save_tool_call(
        &self,
        message_id: i64,
        session_id: i64,
        tool_name: &str,
        args_json: &str,
        agent_name: &str,
    ) -> anyhow::Result<i64> {
        let id = self.alloc();
        self.tool_calls.lock().unwrap().insert(
            id,
            StoredToolCall {
                id,
                message_id,
                session_id,
                tool_name: tool_name.into(),
                args_json: args_json.into(),
                agent_name: agent_name.into(),
                result: None,
                error: None,
                elapsed_ms: None,
            },
        );
        Ok(id)
    }

    async fn update_tool_call_result(
        &self,
        tool_call_id: i64,
        result: Option<&str>,
        error: Option<&str>,
        elapsed_ms: u64,
    ) -> anyhow::Result<()> {
        let mut calls = self.tool_calls.lock().unwrap();
        let call = calls
            .get_mut(&tool_call_id)
            .ok_or_else(|| anyhow::anyhow!("unknown tool call id {tool_call_id}"))?;
        call.result = result.map(str::to_string);
        call.error = error.map(str::to_string);
        call.elapsed_ms = Some(elapsed_ms);
        Ok(())
    }

    async fn dispose(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

// ─── NDJSON store ─────────────────────────────────────────────────────────────

/// One line in the session log file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum LogRecord {
    Session {
        id: i64,
        timestamp: DateTime<Utc>,
        name: String,
        session_type: String,
        parent_id: Option<i64>,
        agent_name: String,
        model: String,
    },
    Message {
        id: i64,
        session_id: i64,
        timestamp: DateTime<Utc>,
        message: Message,
    },
    ToolCall {
        id: i64,
        message_id: i64,
        session_id: i64,
        timestamp: DateTime<Utc>,
        tool_name: String,
        args_json: String,
        agent_name: String,
    },
    ToolCallResult {
        tool_call_id: i64,
        timestamp: DateTime<Utc>,
        result: Option<String>,
        error: Option<String>,
        elapsed_ms: u64,
    },
}

/// Append-only NDJSON session log.  Every record kind shares one id space,
/// so message ids stay monotonic with append order.
pub struct JsonlStore {
    path: PathBuf,
    next_id: AtomicI64,
    write_lock: Mutex<()>,
}

impl JsonlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            next_id: AtomicI64::new(0),
            write_lock: Mutex::new(()),
        }
    }

    fn alloc(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn append(&self, record: &LogRecord) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(f, "{}", serde_json::to_string(record)?)?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for JsonlStore {
    async fn create_session(&self, session: NewSession) -> anyhow::Result<i64> {
        let id = self.alloc();
        self.append(&LogRecord::Session {
            id,
            timestamp: Utc::now(),
            name: session.name,
            session_type: session.session_type,
            parent_id: session.parent_id,
            agent_name: session.agent_name,
            model: session.model,
        })?;
        Ok(id)
    }

    async fn save_message(&self, session_id: i64, message: &Message) -> anyhow::Result<i64> {
        let id = self.alloc();
        self.append(&LogRecord::Message {
            id,
            session_id,
            timestamp: Utc::now(),
            message: message.clone(),
        })?;
        Ok(id)
    }

    async fn save_tool_call(
        &self,
        message_id: i64,
        session_id: i64,
        tool_name: &str,
        args_json: &str,
        agent_name: &str,
    ) -> anyhow::Result<i64> {
        let id = self.alloc();
        self.append(&LogRecord::ToolCall {
            id,
            message_id,
            session_id,
            timestamp: Utc::now(),
            tool_name: tool_name.into(),
            args_json: args_json.into(),
            agent_name: agent_name.into(),
        })?;
        Ok(id)
    }

    async fn update_tool_call_result(
        &self,
        tool_call_id: i64,
        result: Option<&str>,
        error: Option<&str>,
        elapsed_ms: u64,
    ) -> anyhow::Result<()> {
        self.append(&LogRecord::ToolCallResult {
            tool_call_id,
            timestamp: Utc::now(),
            result: result.map(str::to_string),
            error: error.map(str::to_string),
            elapsed_ms,
        })
    }

    async fn dispose(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> NewSession {
        NewSession {
            name: "test".into(),
            session_type: "primary".into(),
            agent_name: "primary".into(),
            model: "mock-model".into(),
            temperature: 0.2,
            max_tokens: 4096,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn memory_message_ids_are_monotonic() {
        let store = MemoryStore::new();
        let sid = store.create_session(session()).await.unwrap();
        let mut last = 0;
        for i in 0..5 {
            let id = store
                .save_message(sid, &Message::user(format!("m{i}")))
                .await
                .unwrap();
            assert!(id > last, "ids must increase with append order");
            last = id;
        }
    }

    #[tokio::test]
    async fn memory_tool_call_result_round_trip() {
        let store = MemoryStore::new();
        let sid = store.create_session(session()).await.unwrap();
        let mid = store.save_message(sid, &Message::user("go")).await.unwrap();
        let tcid = store
            .save_tool_call(mid, sid, "echo", r#"{"x":1}"#, "primary")
            .await
            .unwrap();
        store
            .update_tool_call_result(tcid, Some("ok"), None, 12)
            .await
            .unwrap();
        let call = store.tool_call(tcid).unwrap();
        assert_eq!(call.result.as_deref(), Some("ok"));
        assert_eq!(call.elapsed_ms, Some(12));
        assert!(call.error.is_none());
    }

    #[tokio::test]
    async fn memory_unknown_tool_call_update_fails() {
        let store = MemoryStore::new();
        assert!(store
            .update_tool_call_result(999, None, Some("boom"), 1)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn messages_for_filters_by_session() {
        let store = MemoryStore::new();
        let a = store.create_session(session()).await.unwrap();
        let b = store.create_session(session()).await.unwrap();
        store.save_message(a, &Message::user("in-a")).await.unwrap();
        store.save_message(b, &Message::user("in-b")).await.unwrap();
        let msgs = store.messages_for(a);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].1.as_text(), Some("in-a"));
    }

    #[tokio::test]
    async fn jsonl_store_appends_one_line_per_operation() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::new(dir.path().join("sessions.jsonl"));
        let sid = store.create_session(session()).await.unwrap();
        let mid = store.save_message(sid, &Message::user("hi")).await.unwrap();
        let tcid = store
            .save_tool_call(mid, sid, "grep", "{}", "primary")
            .await
            .unwrap();
        store
            .update_tool_call_result(tcid, Some("done"), None, 3)
            .await
            .unwrap();

        let text = std::fs::read_to_string(dir.path().join("sessions.jsonl")).unwrap();
        assert_eq!(text.lines().count(), 4);
        // every line is valid JSON with a kind tag
        for line in text.lines() {
            let v: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(v.get("kind").is_some());
        }
    }

    #[tokio::test]
    async fn jsonl_ids_are_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::new(dir.path().join("s.jsonl"));
        let sid = store.create_session(session()).await.unwrap();
        let m1 = store.save_message(sid, &Message::user("1")).await.unwrap();
        let m2 = store.save_message(sid, &Message::user("2")).await.unwrap();
        assert!(m2 > m1);
    }

    #[tokio::test]
    async fn null_store_accepts_everything() {
        let store = NullStore;
        let sid = store.create_session(session()).await.unwrap();
        let mid = store.save_message(sid, &Message::user("x")).await.unwrap();
        let tcid = store
            .save_tool_call(mid, sid, "t", "{}", "a")
            .await
            .unwrap();
        store
            .update_tool_call_result(tcid, None, None, 0)
            .await
            .unwrap();
        store.dispose().await.unwrap();
    }
}
