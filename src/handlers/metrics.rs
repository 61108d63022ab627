//! Metrics endpoint handler for the exporter's own metrics.
//!
//! `/metrics` serves the process-wide registry: collection durations and
//! request errors per module, and the optional API and target metrics.
//! Proxmox VE data is only served by `/pve`.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use prometheus::{Encoder, TextEncoder};
use tracing::{debug, error, instrument};

use crate::state::SharedState;

/// Error type for metrics endpoint failures.
#[derive(Debug)]
pub enum MetricsError {
    EncodingFailed,
}

impl IntoResponse for MetricsError {
    fn into_response(self) -> axum::response::Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response()
    }
}

/// Handler for the /metrics endpoint.
#[instrument(skip(state))]
pub async fn metrics_handler(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, MetricsError> {
    debug!("Processing /metrics request");

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&state.registry.gather(), &mut buffer)
        .map_err(|e| {
            error!("Failed to encode self-metrics: {}", e);
            MetricsError::EncodingFailed
        })?;
    let body = String::from_utf8(buffer).map_err(|e| {
        error!("Self-metrics are not valid UTF-8: {}", e);
        MetricsError::EncodingFailed
    })?;

    Ok(([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body))
}
