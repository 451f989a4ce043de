// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Client for the remote fast-apply service.
//!
//! The service speaks the chat-completions wire format: the request packs
//! the edit instructions, the target file, and the edit into one user
//! message, and `choices[0].message.content` comes back as the entire
//! updated file.

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::PatchError;

pub(crate) struct RemoteClient {
    client: reqwest::Client,
    chat_url: String,
    api_key: Option<String>,
    model: String,
    timeout: std::time::Duration,
}

impl RemoteClient {
    pub(crate) fn new(
        base_url: &str,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            client: reqwest::Client::new(),
            chat_url: format!("{base}/chat/completions"),
            api_key,
            model: model.into(),
            timeout,
        }
    }

    /// Ask the service for the full updated file.
    pub(crate) async fn apply(
        &self,
        instructions: &str,
        file_content: &str,
        code_edit: &str,
        cancel: &CancellationToken,
    ) -> Result<String, PatchError> {
        let envelope =
            format!("{instructions}\n<<<FILE>>>\n{file_content}\n<<<EDIT>>>\n{code_edit}");
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": envelope }],
        });

        debug!(url = %self.chat_url, model = %self.model, "remote fast-apply request");

        let mut req = self
            .client
            .post(&self.chat_url)
            .timeout(self.timeout)
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PatchError::Cancelled),
            r = req.send() => r.map_err(|e| PatchError::Remote {
                status: None,
                message: e.to_string(),
                // Timeouts and connection failures are retriable conditions.
                retriable: true,
            })?,
        };

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            let code = status.as_u16();
            return Err(PatchError::Remote {
                status: Some(code),
                message: if message.is_empty() {
                    status.to_string()
                } else {
                    message
                },
                retriable: code == 429 || code >= 500,
            });
        }

        let v: Value = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PatchError::Cancelled),
            r = resp.json() => r.map_err(|e| PatchError::Remote {
                status: None,
                message: format!("invalid response body: {e}"),
                retriable: true,
            })?,
        };

        let content = v["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();
        if content.is_empty() {
            return Err(PatchError::RemoteEmpty);
        }
        Ok(content)
    }
}
