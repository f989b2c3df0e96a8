// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod actor;
mod config;
mod crypto;
mod domain;
mod error;
mod event_log;
mod http;
mod hub;
mod ingress;
mod node;
mod protocol;
mod queue;
mod registry;
mod sandbox;
mod sandbox_client;
mod token_aggregator;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crypto::token::RawToken;
use sandbox_client::HttpSandboxClient;

#[derive(Parser, Debug)]
#[command(name = "session-orchestrator", version, about = "Collaborative coding-agent session orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Increase log verbosity (-v debug, -vv trace). Ignored if RUST_LOG is set.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to an explicit orchestrator config file, merged on top of the
    /// standard search path (see `config` module docs).
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP/WebSocket server (default if no subcommand is given).
    Serve,

    /// Print the fully-resolved configuration and exit.
    ///
    /// Secrets are resolved (${VAR} indirection expanded) but never printed.
    ShowConfig,

    /// Generate a fresh operator shared secret and print it once.
    ///
    /// The orchestrator does not persist secrets itself — paste the printed
    /// value into `operator_shared_secret` in the config file (or into the
    /// environment variable it points at via `${VAR}`).
    RegenerateOperatorSecret,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::ShowConfig => {
            let cfg = config::load(cli.config.as_deref())?;
            println!("http.bind: {}", cfg.http.bind);
            println!("http.max_body_bytes: {}", cfg.http.max_body_bytes);
            println!("deployment_name: {}", cfg.deployment_name);
            println!("workspace_id: {}", cfg.workspace_id);
            println!("default_model: {:?}", cfg.default_model);
            println!("sandbox_api_base_url: {}", cfg.sandbox_api_base_url);
            println!("operator_shared_secret: <redacted>");
            println!("token_pepper: <redacted>");
            println!("sandbox_shared_secret: <redacted>");
            Ok(())
        }
        Commands::RegenerateOperatorSecret => {
            let raw = RawToken::generate();
            println!("New operator shared secret (save it now — it won't be shown again):");
            println!("  {}", raw.as_str());
            println!();
            println!("Usage:  Authorization: Bearer {}", raw.as_str());
            Ok(())
        }
        Commands::Serve => {
            let config = config::load(cli.config.as_deref())?;
            let sandbox_client: Arc<dyn sandbox::SandboxClient> = Arc::new(HttpSandboxClient::new(
                config.sandbox_api_base_url.clone(),
                config.sandbox_shared_secret.clone(),
            ));
            node::run(config, sandbox_client).await
        }
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
