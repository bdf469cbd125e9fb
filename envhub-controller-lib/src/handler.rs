//! The controller's `/pods` CRUD surface.
//!
//! | Method | Path | Result |
//! |---|---|---|
//! | `POST` | `/pods` | `201`, created instance |
//! | `GET` | `/pods/{id}` | instance, cache first |
//! | `GET` | `/pods?filter=expired&owner=` | instance list |
//! | `DELETE` | `/pods/{id}` | `true`, also when already gone |
//!
//! Every failure is rendered as an `ApiResponse` with `success:false`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::rejection::JsonRejection;
use axum::extract::{MatchedPath, Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use envhub_runtime::metrics::metrics;
use envhub_runtime::{ApiResponse, EnvironmentDefinition, Instance, InstanceError};
use serde::Deserialize;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::cache::{PodCache, instance_from_pod};
use crate::cluster::{ClusterError, PodClient};
use crate::merge::render_pod;
use crate::template::{TemplateError, TemplateStore};

/// Everything a request handler needs, built once by the binary.
pub struct ControllerContext {
    pub namespace: String,
    pub templates: TemplateStore,
    pub cache: Arc<PodCache>,
    pub pods: Arc<dyn PodClient>,
}

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ApiError(pub InstanceError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ApiResponse::error(&self.0))).into_response()
    }
}

impl From<InstanceError> for ApiError {
    fn from(err: InstanceError) -> Self {
        Self(err)
    }
}

impl From<ClusterError> for ApiError {
    fn from(err: ClusterError) -> Self {
        Self(err.into())
    }
}

impl From<TemplateError> for ApiError {
    fn from(err: TemplateError) -> Self {
        Self(err.into())
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn create_pod(
    State(ctx): State<Arc<ControllerContext>>,
    payload: Result<Json<EnvironmentDefinition>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<Instance>>), ApiError> {
    let Json(definition) =
        payload.map_err(|rejection| InstanceError::InvalidInput(rejection.body_text()))?;

    let kind = definition.deploy_config.template_kind();
    let template = ctx.templates.load(kind)?;
    let pod = render_pod(template, &definition, &ctx.namespace)?;
    let created = ctx.pods.create(&pod).await?;
    let instance = instance_from_pod(&created);
    info!(
        "created pod {} for {} from template {kind}",
        instance.id,
        definition.qualified_name()
    );
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(instance))))
}

async fn get_pod(
    State(ctx): State<Arc<ControllerContext>>,
    Path(id): Path<String>,
) -> ApiResult<Instance> {
    if let Some(pod) = ctx.cache.get(&id) {
        return Ok(Json(ApiResponse::ok(instance_from_pod(&pod))));
    }
    let pod = ctx.pods.get(&id).await?;
    Ok(Json(ApiResponse::ok(instance_from_pod(&pod))))
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    filter: Option<String>,
    owner: Option<String>,
}

async fn list_pods(
    State(ctx): State<Arc<ControllerContext>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<Instance>> {
    let pods = match query.filter.as_deref().filter(|f| !f.is_empty()) {
        None => ctx.cache.list(),
        Some("expired") => ctx.cache.list_expired(Utc::now()),
        Some(other) => {
            return Err(InstanceError::InvalidInput(format!("unknown filter '{other}'")).into());
        }
    };
    let owner = query.owner.as_deref().filter(|o| !o.is_empty());
    let mut instances: Vec<Instance> = pods
        .iter()
        .map(|pod| instance_from_pod(pod))
        .filter(|instance| owner.is_none() || instance.owner.as_deref() == owner)
        .collect();
    instances.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    Ok(Json(ApiResponse::ok(instances)))
}

async fn delete_pod(
    State(ctx): State<Arc<ControllerContext>>,
    Path(id): Path<String>,
) -> ApiResult<bool> {
    match ctx.pods.delete(&id).await {
        Ok(()) => info!("deleted pod {id}"),
        Err(err) if err.is_not_found() => info!("pod {id} already gone, delete is a no-op"),
        Err(err) => {
            warn!("failed to delete pod {id}: {err}");
            return Err(err.into());
        }
    }
    Ok(Json(ApiResponse::ok(true)))
}

/// Count and time every request under its route template.
pub async fn track_requests(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let started = Instant::now();
    let response = next.run(request).await;
    metrics().record_request(
        &route,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

// ---------------------------------------------------------------------------
// Router builder
// ---------------------------------------------------------------------------

pub fn pods_router(ctx: Arc<ControllerContext>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/pods", get(list_pods).post(create_pod))
        .route("/pods/{id}", get(get_pod).delete(delete_pod))
        .route_layer(middleware::from_fn(track_requests))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
