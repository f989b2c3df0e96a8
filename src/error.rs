// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Orchestrator error kinds and their mapping to transport-level responses.

use axum::http::StatusCode;
use thiserror::Error;

/// The error kinds a session actor or the HTTP layer can surface.
///
/// Each variant carries just enough context for the operator/subscriber
/// side to react correctly; internal detail (stack traces, SQL errors) never
/// crosses the boundary — it is logged and replaced with an opaque message
/// plus a trace id.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("session {0} is archived")]
    SessionTerminal(String),

    #[error("sandbox unavailable: {0}")]
    SandboxUnavailable(String),

    #[error("ingress conflict: {0}")]
    IngressConflict(String),

    #[error("internal error (trace {trace_id})")]
    Internal {
        trace_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    pub fn internal(source: impl Into<anyhow::Error>) -> Self {
        OrchestratorError::Internal {
            trace_id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
        }
    }

    /// Status code for the operator HTTP surface.
    pub fn status_code(&self) -> StatusCode {
        match self {
            OrchestratorError::BadRequest(_) => StatusCode::BAD_REQUEST,
            OrchestratorError::Unauthorized => StatusCode::UNAUTHORIZED,
            OrchestratorError::SessionTerminal(_) => StatusCode::CONFLICT,
            OrchestratorError::SandboxUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            OrchestratorError::IngressConflict(_) => StatusCode::CONFLICT,
            OrchestratorError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            OrchestratorError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            OrchestratorError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The message shown to the external caller. Internal errors never leak
    /// their source, only the trace id an operator can grep logs for.
    pub fn external_message(&self) -> String {
        match self {
            OrchestratorError::Internal { trace_id, .. } => {
                format!("internal error, trace {trace_id}")
            }
            other => other.to_string(),
        }
    }
}

/// WebSocket close codes used on the subscriber channel.
pub mod close_code {
    pub const AUTH_REQUIRED: u16 = 4001;
    pub const SESSION_EXPIRED: u16 = 4002;
    pub const NORMAL: u16 = 1000;
}
