//! # switchboard
//!
//! Hub server binary: loads settings, installs logging and metrics, and
//! serves the demo chat hub over WebSocket until interrupted.

#![deny(unsafe_code)]

mod chat;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use switchboard_server::{HubEndpoint, HubServer};
use switchboard_settings::SwitchboardSettings;
use tracing::{info, warn};

/// Switchboard hub server.
#[derive(Parser, Debug)]
#[command(name = "switchboard", about = "Switchboard hub server")]
struct Cli {
    /// Settings file (defaults to `~/.switchboard/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// WebSocket route of the hub (overrides settings).
    #[arg(long)]
    path: Option<String>,

    /// Log level or `EnvFilter` directive (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON logs.
    #[arg(long)]
    json_logs: bool,

    /// Include error kinds and messages in completions sent to clients.
    #[arg(long)]
    detailed_errors: bool,

    /// Do not install the Prometheus recorder.
    #[arg(long)]
    no_metrics: bool,
}

impl Cli {
    fn load_settings(&self) -> Result<SwitchboardSettings> {
        let path = self
            .settings
            .clone()
            .unwrap_or_else(switchboard_settings::settings_path);
        let mut settings = switchboard_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        self.apply(&mut settings);
        settings.validate().context("Invalid settings")?;
        Ok(settings)
    }

    fn apply(&self, settings: &mut SwitchboardSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(path) = &self.path {
            settings.server.path.clone_from(path);
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
        if self.detailed_errors {
            settings.hub.enable_detailed_errors = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.load_settings()?;

    if settings.logging.json {
        switchboard_core::logging::init_json_subscriber(&settings.logging.level);
    } else {
        switchboard_core::logging::init_subscriber(&settings.logging.level);
    }

    let metrics = if args.no_metrics {
        None
    } else {
        match switchboard_server::metrics::install_recorder() {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!(error = %err, "metrics recorder unavailable, /metrics disabled");
                None
            }
        }
    };

    let endpoint = chat::register(HubEndpoint::builder())
        .options(settings.hub.clone())
        .build()
        .context("Failed to configure hub")?;
    let server = Arc::new(HubServer::new(settings.server.clone(), endpoint, metrics));
    let listener = server
        .bind()
        .await
        .with_context(|| format!("Failed to bind {}:{}", settings.server.host, settings.server.port))?;

    let serving = tokio::spawn({
        let server = server.clone();
        async move { server.serve(listener).await }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;
    info!("shutting down");

    if !server.shutdown_gracefully().await {
        warn!("some connections did not close in time");
    }
    match serving.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, "server stopped with an error"),
        Err(err) => warn!(error = %err, "server task failed"),
    }
    Ok(())
}
