// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prometheus metrics adapter for the Unibox message aggregator.
//!
//! Uses the metrics-rs facade with the Prometheus exporter.
//! Metrics are rendered as Prometheus text format via the `render()` method,
//! which is exposed through the gateway's /metrics endpoint.

pub mod recording;

use async_trait::async_trait;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use unibox_core::{AdapterType, HealthStatus, PluginAdapter, UniboxError};

pub use recording::{record_delivery, record_inbound, record_sync_run};

/// Prometheus metrics adapter.
///
/// Installs the Prometheus recorder and exposes a handle for rendering
/// metrics in Prometheus text format.
pub struct PrometheusAdapter {
    handle: PrometheusHandle,
}

impl PrometheusAdapter {
    /// Create a new PrometheusAdapter.
    ///
    /// Installs the Prometheus recorder globally. Only one recorder can be
    /// installed per process. Returns an error if a recorder is already installed.
    pub fn new() -> Result<Self, UniboxError> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            UniboxError::Internal(format!("failed to install Prometheus recorder: {e}"))
        })?;

        recording::register_metrics();

        tracing::info!("prometheus metrics recorder installed");

        Ok(Self { handle })
    }

    /// Build an adapter around a recorder that is not installed globally.
    pub fn detached() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        Self {
            handle: recorder.handle(),
        }
    }

    /// Get a reference to the Prometheus handle for rendering.
    pub fn handle(&self) -> &PrometheusHandle {
        &self.handle
    }

    /// Render all collected metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

#[async_trait]
impl PluginAdapter for PrometheusAdapter {
    fn name(&self) -> &str {
        "prometheus"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Observability
    }

    async fn health_check(&self) -> Result<HealthStatus, UniboxError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), UniboxError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[test]
    fn detached_adapter_identity() {
        let adapter = PrometheusAdapter::detached();
        assert_eq!(adapter.name(), "prometheus");
        assert_eq!(adapter.adapter_type(), AdapterType::Observability);
    }

    #[test]
    fn recorded_metrics_render_as_prometheus_text() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            record_sync_run("completed", 3, 1, 0.25);
            record_delivery("sent");
            record_inbound("duplicate");
        });
        let text = handle.render();
        assert!(text.contains("unibox_sync_runs_total{outcome=\"completed\"} 1"));
        assert!(text.contains("unibox_messages_imported_total 3"));
        assert!(text.contains("unibox_deliveries_total{status=\"sent\"} 1"));
        assert!(text.contains("unibox_inbound_messages_total{outcome=\"duplicate\"} 1"));
    }

    #[tokio::test]
    async fn health_is_always_healthy() {
        let adapter = PrometheusAdapter::detached();
        assert_eq!(adapter.health_check().await.unwrap(), HealthStatus::Healthy);
    }
}
