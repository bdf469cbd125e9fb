//! Prometheus metrics shared by the controller and gateway binaries.
//!
//! One process-wide registry is exposed through `metrics()`; components that
//! own additional collectors register them with `metrics().register(..)`.

use once_cell::sync::Lazy;
use prometheus::core::Collector;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use tracing::error;

pub struct EnvhubMetrics {
    registry: Registry,
    /// HTTP requests by route template and status code.
    pub http_requests: IntCounterVec,
    pub http_latency: HistogramVec,
    pub token_cache_hits: IntCounter,
    pub token_cache_misses: IntCounter,
    /// Admission rejections by reason (`rate_limit`, `quota`, `auth`).
    pub admission_rejections: IntCounterVec,
    pub reclaim_passes: IntCounter,
    pub reclaim_deleted: IntCounter,
    pub reclaim_failed: IntCounter,
}

impl EnvhubMetrics {
    fn new() -> Self {
        let registry = Registry::new();
        let http_requests = IntCounterVec::new(
            Opts::new("envhub_http_requests_total", "HTTP requests handled"),
            &["route", "status"],
        )
        .expect("static metric definition");
        let http_latency = HistogramVec::new(
            HistogramOpts::new(
                "envhub_http_request_duration_seconds",
                "HTTP request latency",
            ),
            &["route"],
        )
        .expect("static metric definition");
        let token_cache_hits =
            IntCounter::new("envhub_token_cache_hits_total", "Token cache hits")
                .expect("static metric definition");
        let token_cache_misses =
            IntCounter::new("envhub_token_cache_misses_total", "Token cache misses")
                .expect("static metric definition");
        let admission_rejections = IntCounterVec::new(
            Opts::new(
                "envhub_admission_rejections_total",
                "Requests rejected before reaching the backend",
            ),
            &["reason"],
        )
        .expect("static metric definition");
        let reclaim_passes =
            IntCounter::new("envhub_reclaim_passes_total", "Reclamation passes run")
                .expect("static metric definition");
        let reclaim_deleted = IntCounter::new(
            "envhub_reclaim_deleted_total",
            "Expired instances deleted by the reclamation loop",
        )
        .expect("static metric definition");
        let reclaim_failed = IntCounter::new(
            "envhub_reclaim_failed_total",
            "Expired instances the reclamation loop failed to delete",
        )
        .expect("static metric definition");

        let metrics = Self {
            registry,
            http_requests,
            http_latency,
            token_cache_hits,
            token_cache_misses,
            admission_rejections,
            reclaim_passes,
            reclaim_deleted,
            reclaim_failed,
        };
        metrics.register(metrics.http_requests.clone());
        metrics.register(metrics.http_latency.clone());
        metrics.register(metrics.token_cache_hits.clone());
        metrics.register(metrics.token_cache_misses.clone());
        metrics.register(metrics.admission_rejections.clone());
        metrics.register(metrics.reclaim_passes.clone());
        metrics.register(metrics.reclaim_deleted.clone());
        metrics.register(metrics.reclaim_failed.clone());
        metrics
    }

    pub fn register<C>(&self, collector: C)
    where
        C: Collector + Clone + Send + Sync + 'static,
    {
        if let Err(err) = self.registry.register(Box::new(collector)) {
            if !matches!(err, prometheus::Error::AlreadyReg) {
                error!(?err, "failed to register metric");
            }
        }
    }

    pub fn record_request(&self, route: &str, status: u16, elapsed_secs: f64) {
        self.http_requests
            .with_label_values(&[route, &status.to_string()])
            .inc();
        self.http_latency
            .with_label_values(&[route])
            .observe(elapsed_secs);
    }

    pub fn record_rejection(&self, reason: &str) {
        self.admission_rejections.with_label_values(&[reason]).inc();
    }

    pub fn record_reclaim(&self, deleted: usize, failed: usize) {
        self.reclaim_passes.inc();
        self.reclaim_deleted.inc_by(deleted as u64);
        self.reclaim_failed.inc_by(failed as u64);
    }

    /// Text exposition format.
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        if let Err(err) = TextEncoder::new().encode(&self.registry.gather(), &mut buf) {
            error!(?err, "failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

static METRICS: Lazy<EnvhubMetrics> = Lazy::new(EnvhubMetrics::new);

/// Access the global metrics registry.
pub fn metrics() -> &'static EnvhubMetrics {
    &METRICS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_contains_recorded_series() {
        metrics().record_request("/health", 200, 0.001);
        metrics().record_reclaim(2, 1);
        let text = metrics().render();
        assert!(text.contains("envhub_http_requests_total"));
        assert!(text.contains("envhub_reclaim_deleted_total"));
    }
}
