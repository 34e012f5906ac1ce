//! # stasisd, the Stasis agent daemon
//!
//! Serves the control protocol on a Unix socket until interrupted.
//! Configuration comes from the JSON file named by `STASIS_CONFIG`;
//! without it every setting takes its default.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use stasis_agent::Agent;
use stasis_common::config::AgentConfig;
use stasis_common::constants::{CONFIG_ENV, DAEMON_BIN};
use stasis_transport::{Dispatcher, UnixServer};
use tokio::signal::{self, unix::SignalKind};
use tokio_util::sync::CancellationToken;

fn load_config() -> anyhow::Result<AgentConfig> {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) => {
            let path = PathBuf::from(path);
            AgentConfig::load(&path)
                .with_context(|| format!("cannot load config from {}", path.display()))
        }
        None => Ok(AgentConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;
    let socket_path = config.socket_path.clone();
    tracing::info!(
        bin = DAEMON_BIN,
        data_dir = %config.data_dir.display(),
        runtime = ?config.runtime,
        "starting agent"
    );

    let agent = Agent::from_config(config).context("cannot initialize agent")?;
    let server = UnixServer::bind(&socket_path, Dispatcher::new(Arc::new(agent)))
        .with_context(|| format!("cannot listen on {}", socket_path.display()))?;

    let shutdown = CancellationToken::new();
    let stop = shutdown.clone();
    let mut terminate = signal::unix::signal(SignalKind::terminate())
        .context("cannot install SIGTERM handler")?;
    let _ = tokio::spawn(async move {
        let failed = tokio::select! {
            interrupted = signal::ctrl_c() => interrupted.err(),
            _ = terminate.recv() => None,
        };
        if let Some(e) = failed {
            tracing::warn!(error = %e, "cannot listen for interrupts");
            let _ = terminate.recv().await;
        }
        tracing::info!("shutting down");
        stop.cancel();
    });

    server.serve(shutdown).await?;
    Ok(())
}
