// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Operator HTTP handlers under `/internal/*`. Every handler
//! resolves a session from [`SessionRegistry`] and forwards to its
//! [`ActorHandle`](crate::actor::ActorHandle) — no handler touches session
//! state directly.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use crate::actor::{AuthorRef, EnqueueInput, IssueTokenInput, UpsertParticipantInput};
use crate::domain::{EventCategory, EventFilter, EventType};
use crate::error::OrchestratorError;
use crate::protocol::*;

use super::AppState;

impl IntoResponse for OrchestratorError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(serde_json::json!({ "error": self.external_message() }))).into_response()
    }
}

pub async fn init(
    State(state): State<AppState>,
    Json(req): Json<InitRequest>,
) -> Result<Json<InitResponse>, OrchestratorError> {
    if req.user_id.is_empty() {
        return Err(OrchestratorError::BadRequest("userId is required".into()));
    }
    let session_id = state.registry.init(crate::registry::InitParams {
        session_name: req.session_name,
        repo_owner: req.repo_owner,
        repo_name: req.repo_name,
        user_id: req.user_id,
        model: req.model,
        reasoning_effort: req.reasoning_effort,
        github_login: req.github_login,
    });
    Ok(Json(InitResponse { session_id }))
}

fn find_session(
    state: &AppState,
    session_id: Uuid,
) -> Result<crate::actor::ActorHandle, OrchestratorError> {
    state
        .registry
        .get(session_id)
        .ok_or_else(|| OrchestratorError::BadRequest(format!("unknown session {session_id}")))
}

pub async fn enqueue_prompt(
    State(state): State<AppState>,
    Query(q): Query<std::collections::HashMap<String, String>>,
    Json(req): Json<EnqueuePromptRequest>,
) -> Result<Json<EnqueuePromptResponse>, OrchestratorError> {
    let session_id = parse_session_id(&q)?;
    let handle = find_session(&state, session_id)?;
    let (message_id, status) = handle
        .enqueue_prompt(EnqueueInput {
            content: req.content,
            author_id: AuthorRef::External(req.author_id),
            source: req.source,
            attachments: req.attachments,
            callback_context: req.callback_context,
            reasoning_effort: req.reasoning_effort,
        })
        .await?;
    Ok(Json(EnqueuePromptResponse { message_id, status }))
}

pub async fn issue_ws_token(
    State(state): State<AppState>,
    Query(q): Query<std::collections::HashMap<String, String>>,
    Json(req): Json<IssueWsTokenRequest>,
) -> Result<Json<IssueWsTokenResponse>, OrchestratorError> {
    if req.user_id.is_empty() {
        return Err(OrchestratorError::BadRequest("userId is required".into()));
    }
    let session_id = parse_session_id(&q)?;
    let handle = find_session(&state, session_id)?;
    let (token, participant_id) = handle
        .issue_ws_token(IssueTokenInput {
            user_id: req.user_id,
            github_login: req.github_login,
            github_name: req.github_name,
        })
        .await?;
    Ok(Json(IssueWsTokenResponse { token, participant_id }))
}

pub async fn list_participants(
    State(state): State<AppState>,
    Query(q): Query<std::collections::HashMap<String, String>>,
) -> Result<Json<Vec<crate::domain::Participant>>, OrchestratorError> {
    let session_id = parse_session_id(&q)?;
    let handle = find_session(&state, session_id)?;
    Ok(Json(handle.list_participants().await?))
}

pub async fn upsert_participant(
    State(state): State<AppState>,
    Query(q): Query<std::collections::HashMap<String, String>>,
    Json(req): Json<UpsertParticipantRequest>,
) -> Result<Json<crate::domain::Participant>, OrchestratorError> {
    if req.user_id.is_empty() {
        return Err(OrchestratorError::BadRequest("userId is required".into()));
    }
    let session_id = parse_session_id(&q)?;
    let handle = find_session(&state, session_id)?;
    let participant = handle
        .upsert_participant(UpsertParticipantInput {
            user_id: req.user_id,
            github_login: req.github_login,
            display_name: req.display_name,
        })
        .await?;
    Ok(Json(participant))
}

pub async fn list_messages(
    State(state): State<AppState>,
    Query(q): Query<std::collections::HashMap<String, String>>,
) -> Result<Json<ListMessagesResponse>, OrchestratorError> {
    let session_id = parse_session_id(&q)?;
    let handle = find_session(&state, session_id)?;
    let status = q
        .get("status")
        .and_then(|s| serde_json::from_value(serde_json::Value::String(s.clone())).ok());
    let limit = q.get("limit").and_then(|s| s.parse().ok()).unwrap_or(50);
    let cursor = q.get("cursor").cloned();
    let page = handle.list_messages(status, limit, cursor).await?;
    Ok(Json(ListMessagesResponse {
        messages: page.messages,
        has_more: page.has_more,
        cursor: page.cursor,
    }))
}

pub async fn list_events(
    State(state): State<AppState>,
    Query(q): Query<std::collections::HashMap<String, String>>,
) -> Result<Json<ListEventsResponse>, OrchestratorError> {
    let session_id = parse_session_id(&q)?;
    let handle = find_session(&state, session_id)?;
    let category = q.get("type").and_then(|t| category_from_str(t));
    let limit = q.get("limit").and_then(|s| s.parse().ok()).unwrap_or(50);
    let cursor = q.get("cursor").cloned();
    let page = handle.list_events(category, limit, cursor).await?;
    Ok(Json(ListEventsResponse {
        events: page.events,
        has_more: page.has_more,
        cursor: page.cursor,
    }))
}

pub async fn state(
    State(state): State<AppState>,
    Query(q): Query<std::collections::HashMap<String, String>>,
) -> Result<Json<crate::domain::Session>, OrchestratorError> {
    let session_id = parse_session_id(&q)?;
    let handle = find_session(&state, session_id)?;
    Ok(Json(handle.state().await?))
}

pub async fn sandbox_event(
    State(state): State<AppState>,
    Query(q): Query<std::collections::HashMap<String, String>>,
    Json(req): Json<SandboxEventRequest>,
) -> Result<StatusCode, OrchestratorError> {
    let session_id = parse_session_id(&q)?;
    let handle = find_session(&state, session_id)?;
    handle.sandbox_event(req).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn upload_artifact(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<StatusCode, OrchestratorError> {
    let handle = find_session(&state, session_id)?;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| OrchestratorError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or("file").to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| OrchestratorError::BadRequest(e.to_string()))?;
        let event = SandboxEventRequest::Artifact {
            sandbox_id: state.config.workspace_id.clone(),
            timestamp: chrono::Utc::now(),
            artifact_type: crate::domain::ArtifactType::Screenshot,
            url: None,
            metadata: serde_json::json!({ "field": name, "bytes": data.len() }),
        };
        handle.sandbox_event(event).await?;
    }
    Ok(StatusCode::CREATED)
}

fn parse_session_id(q: &std::collections::HashMap<String, String>) -> Result<Uuid, OrchestratorError> {
    q.get("session_id")
        .ok_or_else(|| OrchestratorError::BadRequest("session_id is required".into()))
        .and_then(|s| {
            Uuid::parse_str(s).map_err(|_| OrchestratorError::BadRequest("invalid session_id".into()))
        })
}

fn category_from_str(s: &str) -> Option<EventFilter> {
    match s {
        "execution" => Some(EventFilter::Category(EventCategory::Execution)),
        "git" => Some(EventFilter::Category(EventCategory::Git)),
        "artifact" => Some(EventFilter::Category(EventCategory::Artifact)),
        "system" => Some(EventFilter::Category(EventCategory::System)),
        // Narrower than `system`: only EventType::Error, not every system event.
        "error" => Some(EventFilter::ExactType(EventType::Error)),
        _ => None,
    }
}
