//! Latency and error accounting for API sessions.

use std::time::Instant;

use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry};

use super::{ApiFuture, PveApi};

/// Histogram and error counter of outbound API calls, labeled `method, url`.
#[derive(Clone)]
pub struct ApiMetrics {
    duration: HistogramVec,
    errors: CounterVec,
}

impl ApiMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "pve_scrape_api_duration_seconds",
                "Duration of PVE API calls",
            ),
            &["method", "url"],
        )?;
        let errors = CounterVec::new(
            Opts::new(
                "pve_scrape_api_errors_total",
                "Number of errors occured in PVE API calls",
            ),
            &["method", "url"],
        )?;

        registry.register(Box::new(duration.clone()))?;
        registry.register(Box::new(errors.clone()))?;

        Ok(Self { duration, errors })
    }
}

/// Wraps a session and records every call in [`ApiMetrics`].
pub struct InstrumentedApi<A> {
    inner: A,
    metrics: ApiMetrics,
}

impl<A: PveApi> InstrumentedApi<A> {
    pub fn new(inner: A, metrics: ApiMetrics) -> Self {
        Self { inner, metrics }
    }
}

impl<A: PveApi> PveApi for InstrumentedApi<A> {
    fn get<'a>(&'a self, path: &'a str) -> ApiFuture<'a> {
        Box::pin(async move {
            let url = format!("{}/{}", self.inner.base_url(), path);
            let start = Instant::now();
            let result = self.inner.get(path).await;

            self.metrics
                .duration
                .with_label_values(&["GET", &url])
                .observe(start.elapsed().as_secs_f64());
            if result.is_err() {
                self.metrics.errors.with_label_values(&["GET", &url]).inc();
            }
            result
        })
    }

    fn base_url(&self) -> &str {
        self.inner.base_url()
    }
}
