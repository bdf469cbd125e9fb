//! Always-on probe surface: readiness tracks leadership, liveness is static.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use envhub_runtime::metrics::metrics;

async fn readyz(State(is_leader): State<Arc<AtomicBool>>) -> impl IntoResponse {
    if is_leader.load(Ordering::SeqCst) {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::BAD_REQUEST, "not leader")
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics_text() -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics().render(),
    )
}

pub fn probe_router(is_leader: Arc<AtomicBool>) -> Router {
    Router::new()
        .route("/readyz", get(readyz))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_text))
        .with_state(is_leader)
}
