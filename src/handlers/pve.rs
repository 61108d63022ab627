//! Scrape endpoint handler.
//!
//! `/pve?module=<name>&target=<host>[&cluster=0|1][&node=0|1]` opens a
//! session to the target with the credentials of the module and returns one
//! fresh scrape in Prometheus text format.

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use pve_exporter::{scrape_target, ScrapeScope};
use serde::Deserialize;
use std::time::Instant;
use tracing::{debug, error, instrument, warn};

use crate::config::DEFAULT_MODULE;
use crate::state::SharedState;

fn default_module() -> String {
    DEFAULT_MODULE.to_string()
}

fn default_target() -> String {
    "localhost".to_string()
}

/// Query parameters of `/pve`.
#[derive(Debug, Deserialize)]
pub struct PveQuery {
    #[serde(default = "default_module")]
    pub module: String,
    #[serde(default = "default_target")]
    pub target: String,
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
}

impl PveQuery {
    pub fn scope(&self) -> ScrapeScope {
        ScrapeScope {
            cluster: scope_enabled(self.cluster.as_deref()),
            node: scope_enabled(self.node.as_deref()),
        }
    }
}

/// A scope is on unless explicitly switched off with `0` or `false`.
pub fn scope_enabled(value: Option<&str>) -> bool {
    match value {
        Some(v) => !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false"),
        None => true,
    }
}

/// Handler for the /pve endpoint.
#[instrument(skip(state))]
pub async fn pve_handler(
    State(state): State<SharedState>,
    Query(query): Query<PveQuery>,
) -> Response {
    debug!("Processing /pve request");

    let Some(module) = state.config.module(&query.module) else {
        warn!("Unknown module requested: {}", query.module);
        return (
            StatusCode::BAD_REQUEST,
            format!("Module '{}' not found in config", query.module),
        )
            .into_response();
    };

    if !module.allows(&query.target) {
        warn!(
            "Target {} is not allowed for module {}",
            query.target, query.module
        );
        return (
            StatusCode::FORBIDDEN,
            format!(
                "Target '{}' is not allowed for module '{}'",
                query.target, query.module
            ),
        )
            .into_response();
    }

    let scope = query.scope();
    let start = Instant::now();
    let result = scrape_target(
        &query.target,
        &module.session,
        scope,
        &state.collectors,
        &state.guest_agent,
        state.api_metrics.as_ref(),
    )
    .await;
    let elapsed = start.elapsed();

    if let Some(target_metrics) = &state.target_metrics {
        target_metrics.observe(
            &query.target,
            scope.cluster,
            scope.node,
            elapsed,
            result.is_ok(),
        );
    }

    match result {
        Ok(body) => {
            state
                .exporter_metrics
                .observe_collection(&query.module, elapsed);
            ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response()
        }
        Err(e) => {
            error!("Scrape of {} failed: {}", query.target, e);
            state.exporter_metrics.record_error(&query.module);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to scrape {}: {}", query.target, e),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_defaults_to_everything() {
        let query: PveQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.module, "default");
        assert_eq!(query.target, "localhost");
        assert_eq!(query.scope(), ScrapeScope::default());
    }

    #[test]
    fn test_scope_switches() {
        assert!(scope_enabled(Some("1")));
        assert!(scope_enabled(Some("yes")));
        assert!(!scope_enabled(Some("0")));
        assert!(!scope_enabled(Some("False")));

        let query: PveQuery =
            serde_json::from_str(r#"{"target": "pve1", "cluster": "0"}"#).unwrap();
        let scope = query.scope();
        assert!(!scope.cluster);
        assert!(scope.node);
    }
}
