//! Prometheus export for session metrics.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Install the Prometheus recorder and describe the session metrics.
///
/// # Errors
///
/// Returns an error if the exporter cannot bind or a recorder is already set.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to start Prometheus exporter")?;
    tenvis_stream_core::metrics::describe();

    info!("Metrics server listening on {}", addr);
    Ok(())
}
