// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Maps session identity to a running [`SessionActor`](crate::actor), and
//! implements `init`'s idempotency: the same
//! `(repo_owner, repo_name, session_name)` triple always resolves to the
//! same session, whether or not an actor for it is already running.

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::actor::{ActorHandle, SessionActor};
use crate::config::OrchestratorConfig;
use crate::domain::{Model, ReasoningEffort, Session, SessionStatus};
use crate::sandbox::SandboxClient;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct InitKey {
    repo_owner: String,
    repo_name: String,
    session_name: String,
}

#[derive(Clone)]
pub struct SessionRegistry {
    by_key: Arc<DashMap<InitKey, Uuid>>,
    by_id: Arc<DashMap<Uuid, ActorHandle>>,
    config: Arc<OrchestratorConfig>,
    sandbox_client: Arc<dyn SandboxClient>,
}

pub struct InitParams {
    pub session_name: String,
    pub repo_owner: String,
    pub repo_name: String,
    pub user_id: String,
    pub model: Option<String>,
    pub reasoning_effort: Option<String>,
    pub github_login: Option<String>,
}

impl SessionRegistry {
    pub fn new(config: Arc<OrchestratorConfig>, sandbox_client: Arc<dyn SandboxClient>) -> Self {
        SessionRegistry {
            by_key: Arc::new(DashMap::new()),
            by_id: Arc::new(DashMap::new()),
            config,
            sandbox_client,
        }
    }

    /// `init`: idempotent by `(repo_owner, repo_name, session_name)`.
    pub fn init(&self, params: InitParams) -> Uuid {
        let key = InitKey {
            repo_owner: params.repo_owner.clone(),
            repo_name: params.repo_name.clone(),
            session_name: params.session_name.clone(),
        };
        if let Some(existing) = self.by_key.get(&key) {
            return *existing;
        }

        let model = params
            .model
            .as_deref()
            .and_then(Model::parse)
            .unwrap_or_default();
        let reasoning_effort = params
            .reasoning_effort
            .as_deref()
            .and_then(ReasoningEffort::parse)
            .filter(|e| model.supported_efforts().contains(e));

        let now = chrono::Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            repo_owner: params.repo_owner,
            repo_name: params.repo_name,
            status: SessionStatus::Created,
            current_sha: None,
            model,
            reasoning_effort,
            title: Some(params.session_name),
            created_at: now,
            updated_at: now,
        };
        let session_id = session.id;
        let handle = SessionActor::spawn(session, self.config.clone(), self.sandbox_client.clone());
        self.by_id.insert(session_id, handle);
        self.by_key.insert(key, session_id);
        session_id
    }

    pub fn get(&self, session_id: Uuid) -> Option<ActorHandle> {
        self.by_id.get(&session_id).map(|h| h.value().clone())
    }

    /// Waits for every session's in-flight dispatch to finish, polling up to
    /// `timeout`. Called once, after the HTTP listener has stopped accepting
    /// new work, so shutdown doesn't kill a message mid-execution.
    pub async fn drain(&self, timeout: std::time::Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let handles: Vec<ActorHandle> = self.by_id.iter().map(|e| e.value().clone()).collect();
            let mut any_active = false;
            for handle in &handles {
                if handle.has_in_flight_work().await.unwrap_or(false) {
                    any_active = true;
                    break;
                }
            }
            if !any_active || tokio::time::Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxStartError;

    struct FakeClient;
    #[async_trait::async_trait]
    impl SandboxClient for FakeClient {
        async fn execute(&self, _: Uuid, _: &crate::domain::Message) -> Result<(), SandboxStartError> {
            Ok(())
        }
        async fn stop(&self, _: Uuid) -> Result<(), SandboxStartError> {
            Ok(())
        }
    }

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Arc::new(OrchestratorConfig::default_for_test()), Arc::new(FakeClient))
    }

    fn params() -> InitParams {
        InitParams {
            session_name: "demo".into(),
            repo_owner: "acme".into(),
            repo_name: "widgets".into(),
            user_id: "u1".into(),
            model: None,
            reasoning_effort: None,
            github_login: None,
        }
    }

    #[test]
    fn init_is_idempotent_for_same_identity() {
        let registry = registry();
        let id1 = registry.init(params());
        let id2 = registry.init(params());
        assert_eq!(id1, id2);
    }

    #[test]
    fn invalid_model_falls_back_to_default() {
        let registry = registry();
        let mut p = params();
        p.model = Some("not-a-real-model".into());
        let id = registry.init(p);
        let handle = registry.get(id).unwrap();
        assert_eq!(handle.session_id(), id);
    }
}
