//! Argument parsing and startup for the `aigw` binary.

mod parser;

pub use parser::Cli;

use aigw_axum::{ServerConfig, bootstrap, start_server};
use aigw_core::GatewaySettings;
use std::sync::Arc;
use tracing::info;

/// Resolve settings from the config file and CLI overrides.
pub fn load_settings(cli: &Cli) -> anyhow::Result<GatewaySettings> {
    let mut settings = GatewaySettings::load(cli.config.as_deref())?;
    if let Some(host) = &cli.host {
        settings.server.host.clone_from(host);
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    Ok(settings)
}

/// Run the gateway until Ctrl-C.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = load_settings(&cli)?;
    let config = ServerConfig::from_settings(&settings);
    let state = Arc::new(bootstrap(settings)?);
    info!(state = ?state, "Gateway bootstrapped");

    start_server(config, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    })
    .await
}
