//! Run command implementation.

use crate::server::{start_server, ServerState};
use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use w2p_core::engine::IngestionEngine;
use w2p_core::Config;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Command line and environment overrides applied on top of the config file.
#[derive(Args, Debug, Default)]
pub struct Overrides {
    /// Event stream URL
    #[arg(long, env = "W2P_SOURCE_URL")]
    pub source_url: Option<String>,

    /// GCP project id
    #[arg(long, env = "W2P_PROJECT")]
    pub project: Option<String>,

    /// Pub/Sub topic id
    #[arg(long, env = "W2P_TOPIC")]
    pub topic: Option<String>,

    /// Service account key file
    #[arg(long, env = "GOOGLE_APPLICATION_CREDENTIALS", hide_env_values = true)]
    pub credentials: Option<PathBuf>,

    /// Pub/Sub emulator host (host:port); disables authentication
    #[arg(long, env = "PUBSUB_EMULATOR_HOST")]
    pub emulator_host: Option<String>,
}

impl Overrides {
    /// Apply every override that was given.
    pub fn apply(self, config: &mut Config) {
        if let Some(url) = self.source_url {
            config.source.url = url;
        }
        if let Some(project) = self.project {
            config.sink.project = project;
        }
        if let Some(topic) = self.topic {
            config.sink.topic = topic;
        }
        if let Some(credentials) = self.credentials {
            config.sink.credentials_path = Some(credentials);
        }
        if let Some(host) = self.emulator_host {
            config.sink.emulator_host = Some(host);
        }
    }
}

/// Run the relay until a shutdown signal or a fatal error.
pub async fn run(config: Config) -> Result<()> {
    info!(
        source = %config.source.url,
        topic = %config.sink.topic_path(),
        "Starting relay"
    );

    let health_port = config.monitoring.health_port;
    let metrics_port = config.monitoring.metrics_port;

    let mut engine = IngestionEngine::new(config).await?;
    let shutdown_tx = engine.shutdown_signal();

    let server_state = Arc::new(ServerState {
        health: engine.health(),
        metrics: engine.metrics(),
    });

    // Start HTTP servers
    let server_shutdown_rx = shutdown_tx.subscribe();
    tokio::spawn(start_server(
        server_state,
        health_port,
        metrics_port,
        server_shutdown_rx,
    ));

    // Spawn a task to handle shutdown signals (SIGINT and SIGTERM)
    let shutdown_signal = shutdown_tx.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_signal.send(());
    });

    let result = engine.run().await;

    // Stop the HTTP servers whether the engine exited cleanly or not
    let _ = shutdown_tx.send(());

    result?;
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, initiating graceful shutdown");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler, listening for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, initiating graceful shutdown");
    }
}
