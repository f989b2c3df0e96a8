// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Core data model: the types every other module builds on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::token::StoredToken;

/// Closed set of models a session may run with. Unknown values fall back to
/// [`Model::default`] at config-load or request-validation time — never
/// silently accepted and persisted as free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Model {
    Sonnet,
    Opus,
    Haiku,
}

impl Default for Model {
    fn default() -> Self {
        Model::Sonnet
    }
}

impl Model {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sonnet" => Some(Model::Sonnet),
            "opus" => Some(Model::Opus),
            "haiku" => Some(Model::Haiku),
            _ => None,
        }
    }

    /// The reasoning efforts this model accepts. Used to silently drop a
    /// requested effort that isn't in the model's subset rather than
    /// rejecting the request outright.
    pub fn supported_efforts(&self) -> &'static [ReasoningEffort] {
        use ReasoningEffort::*;
        match self {
            Model::Sonnet => &[None_, Low, Medium, High],
            Model::Opus => &[None_, Low, Medium, High, Xhigh, Max],
            Model::Haiku => &[None_, Low],
        }
    }
}

/// Closed set of reasoning efforts (GLOSSARY). `None_` is the absence of an
/// explicit effort, distinct from the field itself being unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    #[serde(rename = "none")]
    None_,
    Low,
    Medium,
    High,
    Xhigh,
    Max,
}

impl ReasoningEffort {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(ReasoningEffort::None_),
            "low" => Some(ReasoningEffort::Low),
            "medium" => Some(ReasoningEffort::Medium),
            "high" => Some(ReasoningEffort::High),
            "xhigh" => Some(ReasoningEffort::Xhigh),
            "max" => Some(ReasoningEffort::Max),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::None_ => "none",
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
            ReasoningEffort::Xhigh => "xhigh",
            ReasoningEffort::Max => "max",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Active,
    Completed,
    Archived,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub repo_owner: String,
    pub repo_name: String,
    pub status: SessionStatus,
    pub current_sha: Option<String>,
    pub model: Model,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Owner,
    Member,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub user_id: String,
    pub role: ParticipantRole,
    pub joined_at: DateTime<Utc>,
    /// Lookup key for subscriber auth — never the raw token. Tokens are
    /// compared by hash only.
    #[serde(skip_serializing)]
    pub token_hash: Option<StoredToken>,
    pub token_created_at: Option<DateTime<Utc>>,
    pub last_seen: DateTime<Utc>,
    pub github_login: Option<String>,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSource {
    Web,
    Slack,
    Extension,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl MessageStatus {
    /// Monotonic transition table: only forward moves are legal, and a
    /// terminal status never transitions again.
    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MessageStatus::Completed | MessageStatus::Failed | MessageStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub author_participant_id: Uuid,
    pub content: String,
    pub source: MessageSource,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub attachments: Option<Vec<String>>,
    pub callback_context: Option<serde_json::Value>,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    UserMessage,
    Token,
    ToolCall,
    ToolResult,
    ExecutionComplete,
    GitSync,
    Error,
    Artifact,
    /// Anything not in the closed list above still gets logged, filed under
    /// the system category rather than rejected.
    Unknown(String),
}

impl EventType {
    /// Authoritative category mapping used identically by ingress and
    /// subscribers.
    pub fn category(&self) -> EventCategory {
        use EventType::*;
        match self {
            Token | ToolCall | ToolResult | ExecutionComplete => EventCategory::Execution,
            GitSync => EventCategory::Git,
            Artifact => EventCategory::Artifact,
            UserMessage | Error | Unknown(_) => EventCategory::System,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Execution,
    Git,
    Artifact,
    System,
}

/// What a caller can filter the event log by: a whole category, or one
/// exact type within it (e.g. `error` narrows to `EventType::Error` rather
/// than the broader `system` category it belongs to).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    Category(EventCategory),
    ExactType(EventType),
}

impl EventFilter {
    pub fn matches(&self, event_type: &EventType) -> bool {
        match self {
            EventFilter::Category(c) => &event_type.category() == c,
            EventFilter::ExactType(t) => event_type == t,
        }
    }
}

/// An append-only log record. `id` is emitter-chosen and is the dedup key;
/// ordering is by `(created_at, id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub data: serde_json::Value,
    pub message_id: Option<Uuid>,
    /// Set for `tool_call`/`tool_result` events; the dedup key for
    /// "latest wins" in the subscriber view.
    pub call_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn sort_key(&self) -> (DateTime<Utc>, Uuid) {
        (self.created_at, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStatus {
    Pending,
    Warming,
    Syncing,
    Ready,
    Running,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxRecord {
    pub sandbox_id: Option<String>,
    pub status: SandboxStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub git_sync_status: Option<String>,
    pub hostname: Option<String>,
}

impl Default for SandboxRecord {
    fn default() -> Self {
        SandboxRecord {
            sandbox_id: None,
            status: SandboxStatus::Pending,
            last_heartbeat: None,
            git_sync_status: None,
            hostname: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Pr,
    Screenshot,
    Preview,
    Branch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,
    pub url: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_status_allows_only_forward_transitions() {
        assert!(MessageStatus::Pending.can_transition_to(MessageStatus::Processing));
        assert!(!MessageStatus::Completed.can_transition_to(MessageStatus::Processing));
        assert!(!MessageStatus::Pending.can_transition_to(MessageStatus::Completed));
    }

    #[test]
    fn terminal_statuses_are_final() {
        assert!(MessageStatus::Completed.is_terminal());
        assert!(MessageStatus::Failed.is_terminal());
        assert!(!MessageStatus::Processing.is_terminal());
    }

    #[test]
    fn event_category_mapping_matches_table() {
        assert_eq!(EventType::Token.category(), EventCategory::Execution);
        assert_eq!(EventType::GitSync.category(), EventCategory::Git);
        assert_eq!(EventType::Artifact.category(), EventCategory::Artifact);
        assert_eq!(EventType::UserMessage.category(), EventCategory::System);
        assert_eq!(
            EventType::Unknown("frobnicate".into()).category(),
            EventCategory::System
        );
    }

    #[test]
    fn haiku_does_not_support_high_effort() {
        assert!(!Model::Haiku
            .supported_efforts()
            .contains(&ReasoningEffort::High));
    }
}
