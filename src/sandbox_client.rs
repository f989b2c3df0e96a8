// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! HTTP implementation of [`SandboxClient`] — the concrete RPC transport the
//! binary wires up at startup. The remote sandbox runtime itself (what runs
//! on the other end) lives outside this crate; this module only
//! speaks the narrow `execute`/`stop` surface over HTTP, the same way the
//! model drivers in this codebase wrap a plain `reqwest::Client` per provider.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::domain::Message;
use crate::sandbox::{SandboxClient, SandboxStartError};

pub struct HttpSandboxClient {
    base_url: String,
    shared_secret: String,
    client: reqwest::Client,
}

impl HttpSandboxClient {
    pub fn new(base_url: String, shared_secret: String) -> Self {
        HttpSandboxClient {
            base_url,
            shared_secret,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SandboxClient for HttpSandboxClient {
    async fn execute(&self, session_id: Uuid, message: &Message) -> Result<(), SandboxStartError> {
        let url = format!("{}/sandboxes/{session_id}/execute", self.base_url);
        debug!(%session_id, message_id = %message.id, "dispatching execute to sandbox");
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.shared_secret)
            .json(&json!({
                "message_id": message.id,
                "content": message.content,
                "reasoning_effort": message.reasoning_effort,
                "attachments": message.attachments,
                "callback_context": message.callback_context,
            }))
            .send()
            .await
            .map_err(|e| SandboxStartError(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(SandboxStartError(format!(
                "sandbox returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn stop(&self, session_id: Uuid) -> Result<(), SandboxStartError> {
        let url = format!("{}/sandboxes/{session_id}/stop", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.shared_secret)
            .send()
            .await
            .map_err(|e| SandboxStartError(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(SandboxStartError(format!(
                "sandbox returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}
