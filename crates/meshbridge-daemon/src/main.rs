//! Mesh bridge daemon.
//!
//!   NODE_NAME=edge-1 meshbridge --config /etc/meshbridge.toml
//!
//! Stops on Ctrl-C.

use std::sync::Arc;

use clap::Parser;
use meshbridge_daemon::bus::ChannelBus;
use meshbridge_daemon::config::{Cli, Config};
use meshbridge_daemon::endpoints::HttpEndpoints;
use meshbridge_daemon::module::MetaManager;
use meshbridge_daemon::readiness::Readiness;
use meshbridge_daemon::registry::Registry;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("meshbridge=info".parse()?))
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    config.apply(&cli);
    if cli.node_name.is_empty() {
        tracing::warn!("NODE_NAME is not set");
    }
    tracing::info!(node = %cli.node_name, socket = %config.bridge.socket_path.display(), "starting meshbridge");
    if config.metaserver.enable {
        tracing::warn!("metaserver requested but no local server is built in");
    }

    let bus = Arc::new(ChannelBus::new());
    let endpoints = Arc::new(HttpEndpoints::new(config.metaserver.endpoints_url.clone()));
    let bridge = MetaManager::new(
        config.bridge.enable,
        config.client_config(),
        bus,
        Readiness::new(cli.node_name.clone(), endpoints),
    );

    let mut registry = Registry::new();
    registry.register(Arc::new(bridge));

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("shutting down"),
                Err(err) => tracing::error!(error = %err, "failed to listen for ctrl-c"),
            }
            cancel.cancel();
        }
    });

    registry.run(cancel).await;
    Ok(())
}
