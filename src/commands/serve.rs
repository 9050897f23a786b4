//! HTTP server command implementation.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{info, warn};

use telebridge::build_info::BuildInfo;
use telebridge::client;
use telebridge::config::{self, ClientConfig, Config};
use telebridge::server::{self, AppState};
use telebridge::session::SessionRegistry;

pub async fn run(
    config_path: &str,
    host_override: Option<IpAddr>,
    port_override: Option<u16>,
) -> Result<()> {
    let mut config = Config::load(config_path)
        .await
        .with_context(|| format!("Failed to load config from {config_path}"))?;

    // CLI overrides config
    if let Some(host) = host_override {
        config.server.host = host.to_string();
    }
    if let Some(port) = port_override {
        config.server.port = port;
    }

    // Resolve a relative bridge command against the config file directory.
    // Bare program names are left for PATH lookup.
    if let ClientConfig::Subprocess(bridge) = &mut config.client
        && bridge.command.contains(std::path::MAIN_SEPARATOR)
    {
        let resolved = config::resolve_path(Path::new(config_path), Path::new(&bridge.command));
        bridge.command = resolved.to_string_lossy().to_string();
    }

    let factory = client::factory_from_config(&config.client, &config.credentials);
    info!(backend = factory.backend(), "Messaging client backend selected");

    let operation_timeout = config.sessions.operation_timeout();
    let registry = SessionRegistry::new(factory, operation_timeout);
    match operation_timeout {
        Some(timeout) => info!(seconds = timeout.as_secs(), "Operation timeout enabled"),
        None => warn!("Operation timeout disabled, callers may wait indefinitely"),
    }

    let state = AppState {
        registry: registry.clone(),
        max_connections: config.server.max_connections,
    };
    let app = server::build_app(state, config.server.request_timeout_seconds);

    let ip: IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("Invalid server host '{}'", config.server.host))?;
    let addr = SocketAddr::new(ip, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!(addr = %addr, version = %BuildInfo::current(), "Starting server");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Release every session's client before exiting
    registry.shutdown().await;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
