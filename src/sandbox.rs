// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Sandbox lifecycle state machine and heartbeat reconciliation.
//!
//! The controller never talks to the sandbox runtime directly — that RPC
//! surface lives outside this crate. This module only
//! tracks the state transitions the session actor observes through ingress
//! events and decides, on a periodic reconciliation tick, whether the
//! sandbox should be considered dead.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::domain::{Message, SandboxRecord, SandboxStatus};

/// The narrow RPC surface the session actor needs from the remote sandbox
/// runtime. The runtime itself lives outside this crate; this
/// trait is the seam an embedder implements against their own transport.
#[async_trait::async_trait]
pub trait SandboxClient: Send + Sync {
    async fn execute(&self, session_id: Uuid, message: &Message) -> Result<(), SandboxStartError>;
    async fn stop(&self, session_id: Uuid) -> Result<(), SandboxStartError>;
}

#[derive(Debug, thiserror::Error)]
#[error("sandbox start failed: {0}")]
pub struct SandboxStartError(pub String);

/// How long a sandbox may go without a heartbeat before reconciliation
/// forces it to `stopped`.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);

/// Capped retry budget before a sandbox is considered permanently `failed`.
pub const MAX_START_RETRIES: u32 = 3;

pub struct SandboxController {
    record: SandboxRecord,
    retries: u32,
    inflight_message: Option<Uuid>,
}

/// Outcome of a reconciliation pass the caller must act on.
#[derive(Debug, PartialEq, Eq)]
pub enum Reconciliation {
    Healthy,
    /// Heartbeat went stale; sandbox was forced to `stopped`. If `true`,
    /// there is queued work and a fresh sandbox should be requested.
    ForcedStopped { should_restart: bool },
}

impl SandboxController {
    pub fn new() -> Self {
        SandboxController {
            record: SandboxRecord::default(),
            retries: 0,
            inflight_message: None,
        }
    }

    pub fn record(&self) -> &SandboxRecord {
        &self.record
    }

    fn transition(&mut self, next: SandboxStatus) {
        self.record.status = next;
    }

    /// First prompt dispatched for this session: pending -> warming.
    pub fn start_warming(&mut self, message_id: Uuid) {
        if self.record.status == SandboxStatus::Pending {
            self.transition(SandboxStatus::Warming);
        }
        self.inflight_message = Some(message_id);
    }

    /// Sandbox reports it is fetching source (git_sync started).
    pub fn start_syncing(&mut self) {
        if matches!(self.record.status, SandboxStatus::Warming | SandboxStatus::Ready) {
            self.transition(SandboxStatus::Syncing);
        }
    }

    /// `git_sync` event with `status=completed`.
    pub fn git_sync_completed(&mut self) {
        self.transition(SandboxStatus::Ready);
    }

    /// A command was dispatched to the sandbox.
    pub fn start_running(&mut self) {
        self.transition(SandboxStatus::Running);
    }

    /// `execution_complete` observed: the sandbox returns to ready, idle.
    pub fn execution_complete(&mut self) {
        self.inflight_message = None;
        self.transition(SandboxStatus::Ready);
    }

    /// An unrecoverable sandbox error. Returns `true` while retries remain
    /// (caller should retry the start), `false` once the retry budget is
    /// exhausted and the sandbox is now terminally `failed`.
    pub fn on_unrecoverable_error(&mut self) -> bool {
        self.retries += 1;
        if self.retries > MAX_START_RETRIES {
            self.transition(SandboxStatus::Failed);
            false
        } else {
            true
        }
    }

    pub fn stop(&mut self) {
        if !matches!(self.record.status, SandboxStatus::Failed) {
            self.transition(SandboxStatus::Stopped);
        }
        self.inflight_message = None;
    }

    pub fn heartbeat(&mut self, at: DateTime<Utc>, hostname: Option<String>, sandbox_id: Option<String>) {
        self.record.last_heartbeat = Some(at);
        if hostname.is_some() {
            self.record.hostname = hostname;
        }
        if sandbox_id.is_some() {
            self.record.sandbox_id = sandbox_id;
        }
    }

    pub fn set_git_sync_status(&mut self, status: String) {
        self.record.git_sync_status = Some(status);
    }

    /// Run a reconciliation pass: if the controller believes the sandbox is
    /// alive (not stopped/failed/pending) but the heartbeat is stale, force
    /// it to `stopped`.
    pub fn reconcile(&mut self, now: DateTime<Utc>, timeout: Duration, has_pending_work: bool) -> Reconciliation {
        let believed_alive = !matches!(
            self.record.status,
            SandboxStatus::Pending | SandboxStatus::Stopped | SandboxStatus::Failed
        );
        if !believed_alive {
            return Reconciliation::Healthy;
        }
        let stale = match self.record.last_heartbeat {
            Some(last) => {
                let age = now.signed_duration_since(last);
                age.to_std().map(|d| d > timeout).unwrap_or(false)
            }
            None => false,
        };
        if stale {
            warn!(status = ?self.record.status, "sandbox heartbeat stale, forcing stopped");
            self.transition(SandboxStatus::Stopped);
            Reconciliation::ForcedStopped {
                should_restart: has_pending_work,
            }
        } else {
            Reconciliation::Healthy
        }
    }
}

impl Default for SandboxController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn lifecycle_happy_path() {
        let mut c = SandboxController::new();
        assert_eq!(c.record().status, SandboxStatus::Pending);
        c.start_warming(Uuid::new_v4());
        assert_eq!(c.record().status, SandboxStatus::Warming);
        c.start_syncing();
        assert_eq!(c.record().status, SandboxStatus::Syncing);
        c.git_sync_completed();
        assert_eq!(c.record().status, SandboxStatus::Ready);
        c.start_running();
        assert_eq!(c.record().status, SandboxStatus::Running);
        c.execution_complete();
        assert_eq!(c.record().status, SandboxStatus::Ready);
    }

    #[test]
    fn retry_budget_is_capped() {
        let mut c = SandboxController::new();
        c.start_warming(Uuid::new_v4());
        assert!(c.on_unrecoverable_error());
        assert!(c.on_unrecoverable_error());
        assert!(c.on_unrecoverable_error());
        assert!(!c.on_unrecoverable_error());
        assert_eq!(c.record().status, SandboxStatus::Failed);
    }

    #[test]
    fn stale_heartbeat_forces_stopped() {
        let mut c = SandboxController::new();
        c.start_warming(Uuid::new_v4());
        c.git_sync_completed();
        let t0 = Utc::now();
        c.heartbeat(t0, None, None);
        let later = t0 + ChronoDuration::seconds(60);
        let result = c.reconcile(later, DEFAULT_HEARTBEAT_TIMEOUT, true);
        assert_eq!(result, Reconciliation::ForcedStopped { should_restart: true });
        assert_eq!(c.record().status, SandboxStatus::Stopped);
    }

    #[test]
    fn fresh_heartbeat_reconciles_as_healthy() {
        let mut c = SandboxController::new();
        c.start_warming(Uuid::new_v4());
        c.git_sync_completed();
        let t0 = Utc::now();
        c.heartbeat(t0, None, None);
        let result = c.reconcile(t0, DEFAULT_HEARTBEAT_TIMEOUT, true);
        assert_eq!(result, Reconciliation::Healthy);
    }

    #[test]
    fn heartbeat_never_changes_status_by_itself() {
        let mut c = SandboxController::new();
        c.heartbeat(Utc::now(), Some("host".into()), Some("sbx-1".into()));
        assert_eq!(c.record().status, SandboxStatus::Pending);
    }
}
