//! Controller-side collectors, registered into the shared envhub registry.

use std::time::Instant;

use envhub_runtime::metrics::metrics;
use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntGauge};

pub struct ControllerMetrics {
    /// Cluster API call latency in milliseconds by verb and object type.
    pub k8s_latency: HistogramVec,
    pub cached_pods: IntGauge,
}

impl ControllerMetrics {
    fn new() -> Self {
        let k8s_latency = HistogramVec::new(
            HistogramOpts::new(
                "envhub_controller_k8s_api_call_latency_ms",
                "Latency of Kubernetes API calls in milliseconds",
            )
            .buckets(vec![
                5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
            ]),
            &["method", "object_type"],
        )
        .expect("static metric definition");
        let cached_pods = IntGauge::new("envhub_controller_cached_pods", "Pods in the watch cache")
            .expect("static metric definition");
        metrics().register(k8s_latency.clone());
        metrics().register(cached_pods.clone());
        Self {
            k8s_latency,
            cached_pods,
        }
    }

    pub fn observe_k8s(&self, method: &str, object_type: &str, started: Instant) {
        self.k8s_latency
            .with_label_values(&[method, object_type])
            .observe(started.elapsed().as_secs_f64() * 1000.0);
    }
}

static CONTROLLER_METRICS: Lazy<ControllerMetrics> = Lazy::new(ControllerMetrics::new);

pub fn controller_metrics() -> &'static ControllerMetrics {
    &CONTROLLER_METRICS
}
