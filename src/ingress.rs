// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Event Ingress: per-type policy for events POSTed by the sandbox.
//! All application happens through the owning session actor's
//! single-writer loop — a handler here never touches two sessions' state,
//! and an error processing one event never corrupts the log for another.

use chrono::Utc;
use uuid::Uuid;

use crate::domain::{ArtifactType, Event, EventType};
use crate::protocol::SandboxEventRequest;
use crate::sandbox::SandboxController;
use crate::token_aggregator::TokenAggregator;

/// Whether an incoming event should be persisted to the log: false only
/// for `heartbeat`.
pub fn should_persist(req: &SandboxEventRequest) -> bool {
    !matches!(req, SandboxEventRequest::Heartbeat { .. })
}

/// What the session actor must still do after ingress has produced (or
/// withheld) a log entry.
pub enum Outcome {
    /// Nothing further: either a heartbeat, or a duplicate that was
    /// dropped, or a token chunk absorbed into the aggregator (no event yet).
    Absorbed,
    /// An event was appended to the log, optionally carrying a new value
    /// for the session's `current_sha` (set only by a completed `git_sync`).
    Appended { event: Event, new_sha: Option<String> },
    /// The message reached a terminal state; the dispatcher must be
    /// released to continue the queue.
    MessageTerminal {
        message_id: Uuid,
        success: bool,
        error: Option<String>,
        event: Event,
    },
}

/// Apply one sandbox event. `message_is_terminal` lets the caller answer
/// "has this messageId already reached a terminal state" without ingress
/// owning the message table — `execution_complete` must be idempotent and
/// ignored once a message is already terminal.
pub fn apply(
    req: SandboxEventRequest,
    sandbox: &mut SandboxController,
    aggregator: &mut TokenAggregator,
    message_is_terminal: impl Fn(Uuid) -> bool,
) -> Outcome {
    match req {
        SandboxEventRequest::Heartbeat {
            hostname,
            timestamp,
            sandbox_id,
        } => {
            sandbox.heartbeat(timestamp, hostname, Some(sandbox_id));
            Outcome::Absorbed
        }

        SandboxEventRequest::Token {
            message_id, delta, ..
        } => {
            aggregator.add(message_id, &delta);
            Outcome::Absorbed
        }

        SandboxEventRequest::ToolCall {
            message_id,
            call_id,
            tool_name,
            args,
            timestamp,
            ..
        } => {
            sandbox.start_running();
            let event = Event {
                id: Uuid::new_v4(),
                event_type: EventType::ToolCall,
                data: serde_json::json!({ "tool_name": tool_name, "args": args }),
                message_id,
                call_id: Some(call_id),
                created_at: timestamp,
            };
            Outcome::Appended { event, new_sha: None }
        }

        SandboxEventRequest::ToolResult {
            message_id,
            call_id,
            output,
            is_error,
            timestamp,
            ..
        } => {
            let event = Event {
                id: Uuid::new_v4(),
                event_type: EventType::ToolResult,
                data: serde_json::json!({ "output": output, "is_error": is_error }),
                message_id,
                call_id: Some(call_id),
                created_at: timestamp,
            };
            Outcome::Appended { event, new_sha: None }
        }

        SandboxEventRequest::ExecutionComplete {
            message_id,
            success,
            error,
            timestamp,
            ..
        } => {
            if message_is_terminal(message_id) {
                return Outcome::Absorbed;
            }
            aggregator.flush();
            sandbox.execution_complete();
            let event = Event {
                id: Uuid::new_v4(),
                event_type: EventType::ExecutionComplete,
                data: serde_json::json!({ "success": success, "error": error }),
                message_id: Some(message_id),
                call_id: None,
                created_at: timestamp,
            };
            Outcome::MessageTerminal {
                message_id,
                success,
                error,
                event,
            }
        }

        SandboxEventRequest::GitSync {
            status,
            sha,
            timestamp,
            ..
        } => {
            sandbox.set_git_sync_status(status.clone());
            let new_sha = if status == "completed" {
                sandbox.git_sync_completed();
                sha.clone()
            } else {
                None
            };
            let event = Event {
                id: Uuid::new_v4(),
                event_type: EventType::GitSync,
                data: serde_json::json!({ "status": status, "sha": sha }),
                message_id: None,
                call_id: None,
                created_at: timestamp,
            };
            Outcome::Appended { event, new_sha }
        }

        SandboxEventRequest::Artifact {
            artifact_type,
            url,
            metadata,
            timestamp,
            ..
        } => {
            let event = Event {
                id: Uuid::new_v4(),
                event_type: EventType::Artifact,
                data: serde_json::json!({
                    "artifact_type": artifact_type_label(artifact_type),
                    "url": url,
                    "metadata": metadata,
                }),
                message_id: None,
                call_id: None,
                created_at: timestamp,
            };
            Outcome::Appended { event, new_sha: None }
        }

        SandboxEventRequest::Error {
            message, timestamp, ..
        } => {
            let event = Event {
                id: Uuid::new_v4(),
                event_type: EventType::Error,
                data: serde_json::json!({ "message": message }),
                message_id: None,
                call_id: None,
                created_at: timestamp,
            };
            Outcome::Appended { event, new_sha: None }
        }
    }
}

fn artifact_type_label(t: ArtifactType) -> &'static str {
    match t {
        ArtifactType::Pr => "pr",
        ArtifactType::Screenshot => "screenshot",
        ArtifactType::Preview => "preview",
        ArtifactType::Branch => "branch",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn req_heartbeat() -> SandboxEventRequest {
        SandboxEventRequest::Heartbeat {
            sandbox_id: "sbx-1".into(),
            timestamp: Utc::now(),
            hostname: Some("host".into()),
        }
    }

    #[test]
    fn heartbeat_is_not_persisted() {
        assert!(!should_persist(&req_heartbeat()));
    }

    #[test]
    fn heartbeat_updates_sandbox_but_produces_no_event() {
        let mut sandbox = SandboxController::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut agg = TokenAggregator::new(tx);
        let outcome = apply(req_heartbeat(), &mut sandbox, &mut agg, |_| false);
        assert!(matches!(outcome, Outcome::Absorbed));
        assert!(sandbox.record().last_heartbeat.is_some());
    }

    #[test]
    fn execution_complete_is_ignored_once_terminal() {
        let mut sandbox = SandboxController::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut agg = TokenAggregator::new(tx);
        let message_id = Uuid::new_v4();
        let req = SandboxEventRequest::ExecutionComplete {
            sandbox_id: "sbx-1".into(),
            timestamp: Utc::now(),
            message_id,
            success: true,
            error: None,
        };
        let outcome = apply(req, &mut sandbox, &mut agg, |_| true);
        assert!(matches!(outcome, Outcome::Absorbed));
    }

    #[test]
    fn execution_complete_signals_dispatcher_once() {
        let mut sandbox = SandboxController::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut agg = TokenAggregator::new(tx);
        let message_id = Uuid::new_v4();
        let req = SandboxEventRequest::ExecutionComplete {
            sandbox_id: "sbx-1".into(),
            timestamp: Utc::now(),
            message_id,
            success: true,
            error: None,
        };
        let outcome = apply(req, &mut sandbox, &mut agg, |_| false);
        match outcome {
            Outcome::MessageTerminal {
                message_id: mid,
                success,
                ..
            } => {
                assert_eq!(mid, message_id);
                assert!(success);
            }
            _ => panic!("expected MessageTerminal"),
        }
    }

    #[test]
    fn git_sync_completed_updates_sandbox_status() {
        let mut sandbox = SandboxController::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut agg = TokenAggregator::new(tx);
        let req = SandboxEventRequest::GitSync {
            sandbox_id: "sbx-1".into(),
            timestamp: Utc::now(),
            status: "completed".into(),
            sha: Some("abc123".into()),
        };
        apply(req, &mut sandbox, &mut agg, |_| false);
        assert_eq!(sandbox.record().status, crate::domain::SandboxStatus::Ready);
    }

    #[test]
    fn git_sync_completed_returns_new_sha() {
        let mut sandbox = SandboxController::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut agg = TokenAggregator::new(tx);
        let req = SandboxEventRequest::GitSync {
            sandbox_id: "sbx-1".into(),
            timestamp: Utc::now(),
            status: "completed".into(),
            sha: Some("abc123".into()),
        };
        let outcome = apply(req, &mut sandbox, &mut agg, |_| false);
        match outcome {
            Outcome::Appended { new_sha, .. } => assert_eq!(new_sha.as_deref(), Some("abc123")),
            _ => panic!("expected Appended"),
        }
    }

    #[test]
    fn git_sync_in_progress_does_not_return_sha() {
        let mut sandbox = SandboxController::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut agg = TokenAggregator::new(tx);
        let req = SandboxEventRequest::GitSync {
            sandbox_id: "sbx-1".into(),
            timestamp: Utc::now(),
            status: "syncing".into(),
            sha: Some("abc123".into()),
        };
        let outcome = apply(req, &mut sandbox, &mut agg, |_| false);
        match outcome {
            Outcome::Appended { new_sha, .. } => assert!(new_sha.is_none()),
            _ => panic!("expected Appended"),
        }
    }
}
