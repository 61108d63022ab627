//! Self-instrumentation of the exporter.
//!
//! Everything here lives in the process-wide registry served on `/metrics`,
//! never in the output of a scrape.

use std::time::Duration;

use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry, DEFAULT_BUCKETS};

/// Per-module request duration and failures of `/pve`.
#[derive(Clone)]
pub struct ExporterMetrics {
    collection_duration: HistogramVec,
    request_errors: CounterVec,
}

impl ExporterMetrics {
    /// Registers the metrics and initializes the label set of every module,
    /// so each module shows up before its first scrape.
    pub fn new<'a>(
        registry: &Registry,
        modules: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, prometheus::Error> {
        let collection_duration = HistogramVec::new(
            HistogramOpts::new(
                "pve_collection_duration_seconds",
                "Duration of collections by the PVE exporter",
            ),
            &["module"],
        )?;
        let request_errors = CounterVec::new(
            Opts::new(
                "pve_request_errors_total",
                "Errors in requests to PVE exporter",
            ),
            &["module"],
        )?;

        registry.register(Box::new(collection_duration.clone()))?;
        registry.register(Box::new(request_errors.clone()))?;

        for module in modules {
            collection_duration.with_label_values(&[module]);
            request_errors.with_label_values(&[module]);
        }

        Ok(Self {
            collection_duration,
            request_errors,
        })
    }

    pub fn observe_collection(&self, module: &str, elapsed: Duration) {
        self.collection_duration
            .with_label_values(&[module])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_error(&self, module: &str) {
        self.request_errors.with_label_values(&[module]).inc();
    }
}

/// Duration and failures per scraped target and scope.
#[derive(Clone)]
pub struct TargetMetrics {
    duration: HistogramVec,
    errors: CounterVec,
}

impl TargetMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        // whole-cluster scrapes run far longer than the default buckets reach
        let buckets = DEFAULT_BUCKETS.iter().map(|b| b * 10.0).collect();
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "pve_scrape_target_duration_seconds",
                "Duration of scrapes per target",
            )
            .buckets(buckets),
            &["target", "cluster", "node"],
        )?;
        let errors = CounterVec::new(
            Opts::new(
                "pve_scrape_target_errors_total",
                "Number of failed scrapes per target",
            ),
            &["target", "cluster", "node"],
        )?;

        registry.register(Box::new(duration.clone()))?;
        registry.register(Box::new(errors.clone()))?;

        Ok(Self { duration, errors })
    }

    pub fn observe(&self, target: &str, cluster: bool, node: bool, elapsed: Duration, ok: bool) {
        let labels = [target, flag_label(cluster), flag_label(node)];
        self.duration
            .with_label_values(&labels)
            .observe(elapsed.as_secs_f64());
        if !ok {
            self.errors.with_label_values(&labels).inc();
        }
    }
}

fn flag_label(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_count(registry: &Registry, name: &str) -> usize {
        registry
            .gather()
            .iter()
            .find(|mf| mf.get_name() == name)
            .map(|mf| mf.get_metric().len())
            .unwrap_or(0)
    }

    #[test]
    fn test_modules_are_preinitialized() {
        let registry = Registry::new();
        let metrics = ExporterMetrics::new(&registry, ["default", "lab"]).unwrap();

        assert_eq!(sample_count(&registry, "pve_request_errors_total"), 2);
        assert_eq!(sample_count(&registry, "pve_collection_duration_seconds"), 2);

        metrics.record_error("lab");
        assert_eq!(
            metrics.request_errors.with_label_values(&["lab"]).get(),
            1.0
        );
        assert_eq!(
            metrics.request_errors.with_label_values(&["default"]).get(),
            0.0
        );
    }

    #[test]
    fn test_target_errors_only_on_failure() {
        let registry = Registry::new();
        let metrics = TargetMetrics::new(&registry).unwrap();

        metrics.observe("pve1", true, false, Duration::from_millis(200), true);
        metrics.observe("pve1", true, false, Duration::from_millis(300), false);

        let labels = ["pve1", "1", "0"];
        assert_eq!(metrics.errors.with_label_values(&labels).get(), 1.0);
        assert_eq!(
            metrics.duration.with_label_values(&labels).get_sample_count(),
            2
        );
    }
}
