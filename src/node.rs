// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Orchestrator startup — assembles the session registry and starts the
//! HTTP/WebSocket server. Mirrors the shape of a gateway `run()` entry
//! point: build the shared state once, then block on the server.

use std::sync::Arc;

use tracing::info;

use crate::config::OrchestratorConfig;
use crate::registry::SessionRegistry;
use crate::sandbox::SandboxClient;

pub async fn run(
    config: OrchestratorConfig,
    sandbox_client: Arc<dyn SandboxClient>,
) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let bind = config.http.bind.clone();
    let registry = SessionRegistry::new(config.clone(), sandbox_client);

    info!(%bind, deployment = %config.deployment_name, "starting session orchestrator");
    crate::http::serve(config, registry).await
}
