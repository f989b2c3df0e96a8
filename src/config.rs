// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Orchestrator configuration loaded from YAML.
//!
//! Configuration is YAML (never TOML). Layers are **deep-merged** — you can
//! override only the fields you care about in each file.
//!
//! Search order (later overrides earlier):
//! 1. `/etc/<deployment>/orchestrator.yaml`
//! 2. `~/.config/<deployment>/orchestrator.yaml`
//! 3. `.orchestrator.yaml` (workspace-local)
//! 4. Path given to [`load`] explicitly.
//!
//! **All defaults are production-safe.** A secret left unset at load time is
//! an error, not a silently-generated fallback — unlike the HTTP bind or
//! model defaults below, secrets are never invented on the operator's behalf.
//!
//! A `${VAR}` value in any secret field is resolved against the process
//! environment at load time, so secrets can be kept out of the YAML file
//! entirely.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crypto::token::TokenPepper;
use crate::domain::{Model, ReasoningEffort};

fn default_http_bind() -> String {
    "127.0.0.1:8790".to_string()
}

fn default_max_body() -> usize {
    4 * 1024 * 1024
}

fn default_deployment_name() -> String {
    "orchestrator".to_string()
}

fn default_model() -> Model {
    Model::default()
}

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    pub http: HttpConfig,
    pub operator_shared_secret: String,
    pub token_pepper: String,
    pub sandbox_shared_secret: String,
    #[serde(default = "default_sandbox_api_base_url")]
    pub sandbox_api_base_url: String,
    #[serde(default = "default_workspace_id")]
    pub workspace_id: String,
    #[serde(default = "default_deployment_name")]
    pub deployment_name: String,
    #[serde(default = "default_model")]
    pub default_model: Model,
}

fn default_workspace_id() -> String {
    "default".to_string()
}

fn default_sandbox_api_base_url() -> String {
    "http://127.0.0.1:8791".to_string()
}

impl Default for RawConfig {
    fn default() -> Self {
        RawConfig {
            http: HttpConfig::default(),
            operator_shared_secret: String::new(),
            token_pepper: String::new(),
            sandbox_shared_secret: String::new(),
            sandbox_api_base_url: default_sandbox_api_base_url(),
            workspace_id: default_workspace_id(),
            deployment_name: default_deployment_name(),
            default_model: default_model(),
        }
    }
}

/// HTTP/WebSocket listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// `host:port` to listen on. Default: `127.0.0.1:8790` (loopback only).
    #[serde(default = "default_http_bind")]
    pub bind: String,

    /// Maximum request body size in bytes (default: 4 MiB) — applies to the
    /// `/sessions/:id/artifact` multipart upload route as well as JSON
    /// operator endpoints.
    #[serde(default = "default_max_body")]
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_http_bind(),
            max_body_bytes: default_max_body(),
        }
    }
}

/// Fully resolved configuration handed to the rest of the process: secrets
/// are parsed into their working representations (`TokenPepper`), and the
/// `${VAR}` indirection has already been expanded.
#[derive(Clone)]
pub struct OrchestratorConfig {
    pub http: HttpConfig,
    pub operator_shared_secret: String,
    pub token_pepper: TokenPepper,
    pub sandbox_shared_secret: String,
    pub sandbox_api_base_url: String,
    pub workspace_id: String,
    pub deployment_name: String,
    pub default_model: Model,
}

impl OrchestratorConfig {
    fn from_raw(raw: RawConfig) -> anyhow::Result<Self> {
        Ok(OrchestratorConfig {
            operator_shared_secret: resolve_secret(&raw.operator_shared_secret)?,
            token_pepper: TokenPepper::new(resolve_secret(&raw.token_pepper)?.into_bytes()),
            sandbox_shared_secret: resolve_secret(&raw.sandbox_shared_secret)?,
            sandbox_api_base_url: raw.sandbox_api_base_url,
            http: raw.http,
            workspace_id: raw.workspace_id,
            deployment_name: raw.deployment_name,
            default_model: raw.default_model,
        })
    }

    /// Resolve a requested reasoning effort against the session's model,
    /// falling back per the chain: per-message, then session,
    /// then model default. An effort outside the model's closed subset is
    /// silently dropped rather than rejected.
    pub fn resolve_effort(
        &self,
        message_effort: Option<ReasoningEffort>,
        session_effort: Option<ReasoningEffort>,
        model: Model,
    ) -> Option<ReasoningEffort> {
        message_effort
            .or(session_effort)
            .filter(|e| model.supported_efforts().contains(e))
    }

    #[cfg(test)]
    pub fn default_for_test() -> Self {
        OrchestratorConfig {
            http: HttpConfig::default(),
            operator_shared_secret: "test-operator-secret".into(),
            token_pepper: TokenPepper::new(b"test-pepper".to_vec()),
            sandbox_shared_secret: "test-sandbox-secret".into(),
            sandbox_api_base_url: default_sandbox_api_base_url(),
            workspace_id: "test-workspace".into(),
            deployment_name: "test".into(),
            default_model: Model::default(),
        }
    }
}

/// Resolve a `${VAR}` indirection against the environment; a plain string
/// passes through unchanged.
fn resolve_secret(raw: &str) -> anyhow::Result<String> {
    if let Some(var_name) = raw.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name)
            .with_context(|| format!("environment variable {var_name} is not set"))
    } else {
        Ok(raw.to_string())
    }
}

// ── Loader ────────────────────────────────────────────────────────────────────

fn config_search_paths(deployment_name: &str) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    paths.push(PathBuf::from(format!("/etc/{deployment_name}/orchestrator.yaml")));
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(format!(".config/{deployment_name}/orchestrator.yaml")));
    }
    paths.push(PathBuf::from(".orchestrator.yaml"));
    paths
}

pub fn load(extra: Option<&Path>) -> anyhow::Result<OrchestratorConfig> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    // A first pass just to learn the deployment name, which determines the
    // rest of the search path — defaults to "orchestrator" if unset anywhere.
    let deployment_name = extra
        .and_then(|p| std::fs::read_to_string(p).ok())
        .and_then(|s| serde_yaml::from_str::<serde_yaml::Value>(&s).ok())
        .and_then(|v| v.get("deployment_name")?.as_str().map(str::to_string))
        .unwrap_or_else(default_deployment_name);

    for path in config_search_paths(&deployment_name) {
        if path.is_file() {
            debug!(path = %path.display(), "loading orchestrator config layer");
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let layer: serde_yaml::Value = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            merge_yaml(&mut merged, layer);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit orchestrator config");
        let text =
            std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        let layer: serde_yaml::Value =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        merge_yaml(&mut merged, layer);
    }

    let raw: RawConfig = serde_yaml::from_value(merged).context("parsing orchestrator config")?;
    OrchestratorConfig::from_raw(raw)
}

fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_http_bind_is_loopback() {
        let c = RawConfig::default();
        assert!(c.http.bind.starts_with("127.0.0.1"));
    }

    #[test]
    fn secret_resolves_env_indirection() {
        std::env::set_var("ORCH_TEST_SECRET", "shh");
        let resolved = resolve_secret("${ORCH_TEST_SECRET}").unwrap();
        assert_eq!(resolved, "shh");
    }

    #[test]
    fn plain_secret_passes_through() {
        let resolved = resolve_secret("literal-value").unwrap();
        assert_eq!(resolved, "literal-value");
    }

    #[test]
    fn effort_resolution_prefers_message_then_session_then_drops_unsupported() {
        let config = OrchestratorConfig::default_for_test();
        let resolved = config.resolve_effort(
            Some(ReasoningEffort::High),
            Some(ReasoningEffort::Low),
            Model::Haiku,
        );
        // Haiku doesn't support High — dropped, not silently coerced.
        assert_eq!(resolved, None);
    }

    #[test]
    fn effort_resolution_falls_back_to_session_when_message_absent() {
        let config = OrchestratorConfig::default_for_test();
        let resolved = config.resolve_effort(None, Some(ReasoningEffort::Low), Model::Sonnet);
        assert_eq!(resolved, Some(ReasoningEffort::Low));
    }

    #[test]
    fn config_yaml_round_trip() {
        let c = RawConfig::default();
        let yaml = serde_yaml::to_string(&c).unwrap();
        let back: RawConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.http.bind, c.http.bind);
    }
}
