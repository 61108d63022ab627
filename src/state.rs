//! Application state management for the exporter.
//!
//! This module defines the shared application state that is passed
//! to HTTP handlers.

use prometheus::Registry;
use pve_exporter::{ApiMetrics, CollectorOptions, GuestAgentOptions};
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::telemetry::{ExporterMetrics, TargetMetrics};

/// Type alias for shared application state.
pub type SharedState = Arc<AppState>;

/// Global application state shared across requests.
pub struct AppState {
    pub registry: Registry,
    pub config: Arc<Config>,
    pub collectors: CollectorOptions,
    pub guest_agent: GuestAgentOptions,
    pub exporter_metrics: ExporterMetrics,
    /// Per-call API metrics, when `--metrics.api` is set.
    pub api_metrics: Option<ApiMetrics>,
    /// Per-target scrape metrics, when `--metrics.target` is set.
    pub target_metrics: Option<TargetMetrics>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Builds the state and registers all enabled self-metrics.
    pub fn new(
        config: Config,
        collectors: CollectorOptions,
        guest_agent: GuestAgentOptions,
        metrics_api: bool,
        metrics_target: bool,
    ) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let exporter_metrics =
            ExporterMetrics::new(&registry, config.modules.keys().map(String::as_str))?;
        let api_metrics = metrics_api.then(|| ApiMetrics::new(&registry)).transpose()?;
        let target_metrics = metrics_target
            .then(|| TargetMetrics::new(&registry))
            .transpose()?;

        Ok(Self {
            registry,
            config: Arc::new(config),
            collectors,
            guest_agent,
            exporter_metrics,
            api_metrics,
            target_metrics,
            start_time: Instant::now(),
        })
    }
}
