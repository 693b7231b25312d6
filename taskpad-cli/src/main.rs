//! # Taskpad
//!
//! Terminal front-end for Taskpad. Signs users in against the hosted auth
//! service and manages their personal task list through an interactive
//! shell.
//!
//! ## Usage
//!
//! ```bash
//! # Against the hosted service (reads TASKPAD_BACKEND_URL / _ANON_KEY)
//! cargo run -p taskpad-cli
//!
//! # Fully local, nothing is persisted
//! cargo run -p taskpad-cli -- --offline
//! ```

mod cli;
mod commands;
mod shell;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use taskpad_shared::backend::{InMemoryBackend, RestBackend};
use taskpad_shared::config::BackendConfig;
use taskpad_shared::session::SessionManager;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::Cli;
use commands::{Connection, Executor};
use shell::Shell;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cli.default_log_filter().into());
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    tracing::info!("Taskpad v{} starting...", env!("CARGO_PKG_VERSION"));

    let connection = if cli.offline {
        tracing::info!("Using in-process backend");
        Connection::Offline(Arc::new(InMemoryBackend::new()))
    } else {
        let config = BackendConfig::from_env().context("Failed to load backend configuration")?;
        tracing::info!(url = %config.url, "Using hosted backend");
        let mut backend = RestBackend::new(&config).context("Failed to create backend client")?;
        if let Some(file) = config.session_store() {
            tracing::debug!(path = %file.path().display(), "Using session file");
            backend = backend.with_session_file(file);
        }
        Connection::Online(Arc::new(backend))
    };

    let session = SessionManager::start(connection.auth()).await;
    let mut shell = Shell::new(Executor::new(connection, session.clone()));
    let result = shell.run().await;

    session.shutdown();
    tracing::info!("Shutdown complete");

    result
}
