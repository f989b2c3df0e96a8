// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Wire protocol for the subscriber channel and the operator HTTP surface.
//! Tagged, `snake_case` JSON enums throughout — the subscriber channel has
//! no binary-codec requirement, so there is no CBOR path here.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Event, Message, Participant, ReasoningEffort, Session};

// ── Subscriber channel: client -> server ─────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe {
        token: String,
        client_id: String,
    },
    Prompt {
        content: String,
        attachments: Option<Vec<String>>,
        reasoning_effort: Option<ReasoningEffort>,
    },
    Stop,
    Typing {
        is_typing: bool,
    },
    Ping,
}

// ── Subscriber channel: server -> client ─────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub session: Session,
    pub participants: Vec<Participant>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[allow(clippy::large_enum_variant)]
pub enum ServerFrame {
    Subscribed {
        state: StateSnapshot,
    },
    SandboxEvent {
        event: Event,
    },
    ReplayComplete,
    SandboxStatus {
        status: crate::domain::SandboxStatus,
    },
    ProcessingStatus {
        message_id: Option<Uuid>,
        status: crate::domain::MessageStatus,
    },
    SandboxWarming,
    SandboxReady,
    ParticipantJoined {
        participant: Participant,
    },
    ParticipantLeft {
        participant_id: Uuid,
    },
    Typing {
        participant_id: Uuid,
        is_typing: bool,
    },
    Pong,
}

// ── Operator HTTP surface request/response bodies ────────────────────────────

#[derive(Debug, Deserialize)]
pub struct InitRequest {
    pub session_name: String,
    pub repo_owner: String,
    pub repo_name: String,
    pub repo_id: String,
    pub user_id: String,
    pub model: Option<String>,
    pub reasoning_effort: Option<String>,
    pub github_login: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InitResponse {
    pub session_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct EnqueuePromptRequest {
    pub content: String,
    /// Opaque caller-supplied identifier (e.g. `"user-1"`), not necessarily
    /// a participant's internal id — resolved against the participant table
    /// by the session actor.
    pub author_id: String,
    pub source: crate::domain::MessageSource,
    pub attachments: Option<Vec<String>>,
    pub callback_context: Option<serde_json::Value>,
    pub reasoning_effort: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EnqueuePromptResponse {
    pub message_id: Uuid,
    pub status: crate::domain::MessageStatus,
}

#[derive(Debug, Deserialize)]
pub struct IssueWsTokenRequest {
    pub user_id: String,
    pub github_login: Option<String>,
    pub github_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IssueWsTokenResponse {
    pub token: String,
    pub participant_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct UpsertParticipantRequest {
    pub user_id: String,
    pub github_login: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    pub status: Option<crate::domain::MessageStatus>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListMessagesResponse {
    pub messages: Vec<Message>,
    pub has_more: bool,
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListEventsQuery {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListEventsResponse {
    pub events: Vec<Event>,
    pub has_more: bool,
    pub cursor: Option<String>,
}

/// Body of `POST /internal/sandbox-event`: shape varies by `type`, but every
/// variant carries `sandbox_id` and `timestamp`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SandboxEventRequest {
    Heartbeat {
        sandbox_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
        hostname: Option<String>,
    },
    Token {
        sandbox_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
        message_id: Uuid,
        delta: String,
    },
    ToolCall {
        sandbox_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
        message_id: Option<Uuid>,
        call_id: String,
        tool_name: String,
        args: serde_json::Value,
    },
    ToolResult {
        sandbox_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
        message_id: Option<Uuid>,
        call_id: String,
        output: serde_json::Value,
        is_error: bool,
    },
    ExecutionComplete {
        sandbox_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
        message_id: Uuid,
        success: bool,
        error: Option<String>,
    },
    GitSync {
        sandbox_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
        status: String,
        sha: Option<String>,
    },
    Artifact {
        sandbox_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
        artifact_type: crate::domain::ArtifactType,
        url: Option<String>,
        metadata: serde_json::Value,
    },
    Error {
        sandbox_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frame_subscribe_round_trips() {
        let json = r#"{"type":"subscribe","token":"abc","client_id":"c1"}"#;
        let parsed: ClientFrame = serde_json::from_str(json).unwrap();
        match parsed {
            ClientFrame::Subscribe { token, client_id } => {
                assert_eq!(token, "abc");
                assert_eq!(client_id, "c1");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn server_frame_serializes_tagged_snake_case() {
        let frame = ServerFrame::ReplayComplete;
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(json, r#"{"type":"replay_complete"}"#);
    }

    #[test]
    fn sandbox_event_heartbeat_parses() {
        let json = r#"{"type":"heartbeat","sandbox_id":"sbx-1","timestamp":"2026-01-01T00:00:00Z","hostname":"h1"}"#;
        let parsed: SandboxEventRequest = serde_json::from_str(json).unwrap();
        matches!(parsed, SandboxEventRequest::Heartbeat { .. });
    }
}
