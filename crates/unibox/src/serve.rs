// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `unibox serve` command implementation.
//!
//! Opens SQLite storage, builds the broker connector and the sync pipeline,
//! installs the Prometheus recorder when compiled in, and serves the gateway
//! until SIGINT or SIGTERM.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use unibox_config::UniboxConfig;
use unibox_connector::BrokerConnector;
use unibox_core::{ConnectorAdapter, HealthStatus, PluginAdapter, StorageAdapter, UniboxError};
use unibox_gateway::{GatewayState, HealthState, ServerConfig, WebhookAuth};
use unibox_storage::SqliteStorage;
use unibox_sync::Pipeline;

#[cfg(feature = "prometheus")]
use unibox_prometheus::PrometheusAdapter;

/// Runs the `unibox serve` command.
pub async fn run_serve(config: UniboxConfig) -> Result<(), UniboxError> {
    init_tracing(&config.server.log_level);

    let cancel = install_signal_handler();

    let prometheus_render = init_metrics();

    let storage = SqliteStorage::new(config.storage.clone());
    storage.initialize().await?;
    info!(path = %config.storage.database_path, "storage initialized");
    let storage: Arc<dyn StorageAdapter> = Arc::new(storage);

    let connector = BrokerConnector::new(&config.broker)?;
    match connector.health_check().await? {
        HealthStatus::Healthy => info!(base_url = %config.broker.base_url, "broker connector ready"),
        HealthStatus::Degraded(reason) | HealthStatus::Unhealthy(reason) => {
            warn!(reason = %reason, "broker connector degraded")
        }
    }
    let connector: Arc<dyn ConnectorAdapter> = Arc::new(connector);

    let pipeline = Arc::new(Pipeline::new(connector, Arc::clone(&storage), &config));

    let state = GatewayState {
        pipeline,
        webhook: WebhookAuth {
            token: config.server.webhook_token.clone(),
        },
        health: HealthState {
            start_time: std::time::Instant::now(),
            prometheus_render,
        },
    };

    let server_config = ServerConfig {
        host: config.server.host.clone(),
        port: config.server.port,
    };

    let served = unibox_gateway::start_server(&server_config, state, cancel).await;

    if let Err(e) = storage.close().await {
        warn!(error = %e, "failed to close storage cleanly");
    }

    served?;
    info!("unibox shut down");
    Ok(())
}

#[cfg(feature = "prometheus")]
fn init_metrics() -> Option<Arc<dyn Fn() -> String + Send + Sync>> {
    match PrometheusAdapter::new() {
        Ok(adapter) => {
            let adapter = Arc::new(adapter);
            Some(Arc::new(move || adapter.render()))
        }
        Err(e) => {
            warn!(error = %e, "prometheus recorder unavailable, /metrics disabled");
            None
        }
    }
}

#[cfg(not(feature = "prometheus"))]
fn init_metrics() -> Option<Arc<dyn Fn() -> String + Send + Sync>> {
    None
}

/// Returns a token that is cancelled on SIGINT or SIGTERM.
fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received, draining connections");
        cancel.cancel();
    });

    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Initializes the tracing subscriber with the given log level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("unibox={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
