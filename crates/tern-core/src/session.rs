// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
use tern_model::{Message, MessageContent, Role};
use uuid::Uuid;

/// In-memory conversation history.  Owned exclusively by the agent's loop;
/// append order equals conversation causal order.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub messages: Vec<Message>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            messages: Vec::new(),
        }
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    /// Drop everything except system messages (used when history is not
    /// maintained across turns).
    pub fn retain_system(&mut self) {
        self.messages.retain(|m| m.role == Role::System);
    }

    /// Build the outgoing message list for one request.
    ///
    /// With `max_messages` set, non-system messages are trimmed from the
    /// front until the total (system messages included) fits the cap.
    /// System messages are always preserved.  The trim never starts the
    /// kept tail on an orphan tool result: the boundary advances past tool
    /// messages whose originating call was trimmed away.
    pub fn request_messages(&self, max_messages: Option<usize>) -> Vec<Message> {
        let Some(cap) = max_messages else {
            return self.messages.clone();
        };

        let system: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .cloned()
            .collect();
        let non_system: Vec<&Message> = self
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .collect();

        let budget = cap.saturating_sub(system.len());
        let mut start = non_system.len().saturating_sub(budget);

        // Never lead with a tool result whose call was trimmed, and never
        // split an assistant tool-call group from its results.
        while start < non_system.len()
            && matches!(
                non_system[start].content,
                MessageContent::ToolResult { .. } | MessageContent::ToolCall { .. }
            )
        {
            start += 1;
        }

        let mut out = system;
        out.extend(non_system[start..].iter().map(|m| (*m).clone()));
        out
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
