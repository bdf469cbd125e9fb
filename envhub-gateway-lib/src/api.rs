//! Public `/env-instance` surface.
//!
//! Create runs auth, then the global rate limit, then the tenant quota before
//! the registry and backend are touched. Index updates after create and
//! delete are best-effort.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, MatchedPath, Path, Request, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use envhub_runtime::definition::{split_name_version, split_name_version_strict};
use envhub_runtime::metrics::metrics;
use envhub_runtime::{
    ApiResponse, EnvironmentDefinition, Instance, InstanceError, InstanceSummary, ListFilter,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::{Caller, require_auth};
use crate::rate_limit::rate_limit;
use crate::state::GatewayState;

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

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateEnvInstanceRequest {
    #[serde(rename = "envName")]
    pub env_name: String,
    #[serde(default)]
    pub datasource: String,
    #[serde(default)]
    pub environment_variables: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub arguments: Option<Vec<String>>,
    #[serde(default)]
    pub ttl: String,
}

impl CreateEnvInstanceRequest {
    /// Fold request overrides into the resolved definition.
    fn apply(&self, definition: &mut EnvironmentDefinition) {
        definition.apply_datasource(&self.datasource);
        let cfg = &mut definition.deploy_config;
        if let Some(vars) = &self.environment_variables {
            cfg.environment_variables = vars.clone();
        }
        if let Some(args) = &self.arguments {
            cfg.arguments = args.clone();
        }
        if !self.ttl.trim().is_empty() {
            cfg.ttl = Some(self.ttl.trim().to_string());
        }
    }
}

async fn create_instance(
    State(state): State<Arc<GatewayState>>,
    Extension(caller): Extension<Caller>,
    payload: Result<Json<CreateEnvInstanceRequest>, JsonRejection>,
) -> ApiResult<Instance> {
    let Json(req) = payload.map_err(|rejection| {
        InstanceError::InvalidInput(format!("invalid request parameters: {}", rejection.body_text()))
    })?;
    let (name, version) = split_name_version_strict(&req.env_name)?;

    let tenant = caller.tenant_key();
    if let Some(tenant) = &tenant {
        if let Err(err) = state
            .quota
            .admit(tenant, state.index.as_ref(), state.backend.as_ref())
            .await
        {
            if matches!(err, InstanceError::QuotaExceeded(_)) {
                metrics().record_rejection("quota");
            }
            return Err(err.into());
        }
    }

    let mut definition = state.identity.get_env(&name, &version).await?;
    req.apply(&mut definition);
    definition.deploy_config.owner = tenant.clone();

    let mut instance = state.backend.create(&definition).await?;
    instance.owner = tenant.clone();
    instance.env = Some(definition);
    info!("created instance {} for {}", instance.id, req.env_name);

    if let Some(tenant) = &tenant {
        if let Err(err) = state
            .index
            .add(tenant, &InstanceSummary::from(&instance))
            .await
        {
            warn!("failed to index instance {}: {err}", instance.id);
        }
    }
    Ok(Json(ApiResponse::ok(instance)))
}

async fn get_instance(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> ApiResult<Instance> {
    let instance = state.backend.get(&id).await?;
    Ok(Json(ApiResponse::ok(instance)))
}

async fn delete_instance(
    State(state): State<Arc<GatewayState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> ApiResult<bool> {
    state.backend.delete(&id).await?;
    info!("deleted instance {id}");
    if let Some(tenant) = caller.tenant_key() {
        if let Err(err) = state.index.remove(&tenant, &id).await {
            warn!("failed to drop instance {id} from index: {err}");
        }
    }
    Ok(Json(ApiResponse::ok(true)))
}

/// `id` is `name`, `name@version`, or `*` for everything the caller owns.
async fn list_instances(
    State(state): State<Arc<GatewayState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> ApiResult<Vec<InstanceSummary>> {
    let (name, version) = if id == "*" {
        (String::new(), String::new())
    } else {
        split_name_version(&id)
    };

    let tenant = caller.tenant_key();

    if let Some(tenant) = &tenant {
        match state.index.list(tenant).await {
            Ok(summaries) => {
                let summaries = summaries
                    .into_iter()
                    .filter(|s| s.matches(&name, &version))
                    .collect();
                return Ok(Json(ApiResponse::ok(summaries)));
            }
            // Without ownership on the backend side there is no tenant-scoped fallback.
            Err(err) if !state.backend.reports_owner() => return Err(err.into()),
            Err(err) => warn!("tenant index list failed, asking backend: {err}"),
        }
    }

    let filter = ListFilter {
        env_name: Some(name).filter(|n| !n.is_empty()),
        env_version: Some(version).filter(|v| !v.is_empty()),
        owner: tenant,
        expired_only: false,
    };
    let instances = state.backend.list(&filter).await?;
    Ok(Json(ApiResponse::ok(
        instances.iter().map(InstanceSummary::from).collect(),
    )))
}

async fn warmup(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> ApiResult<EnvironmentDefinition> {
    let (name, version) = split_name_version_strict(&id)?;
    let definition = state.identity.get_env(&name, &version).await?;
    state.backend.warmup(&definition).await?;
    info!("warmup requested for {id}");
    Ok(Json(ApiResponse::ok(definition)))
}

async fn health() -> Json<Value> {
    Json(json!({}))
}

async fn metrics_text() -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics().render(),
    )
}

/// Count and time every request under its route template.
async fn track_requests(request: Request, next: Next) -> Response {
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

pub fn gateway_router(state: Arc<GatewayState>, request_timeout: Duration) -> Router {
    let create = Router::new()
        .route("/env-instance", post(create_instance))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    let authed = Router::new()
        .merge(create)
        .route("/env-instance/{id}", get(get_instance).delete(delete_instance))
        .route("/env-instance/{id}/list", get(list_instances))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(authed)
        .route("/env-instance/{id}/warmup", put(warmup))
        .route("/health", get(health))
        .route("/metrics", get(metrics_text))
        .route_layer(middleware::from_fn(track_requests))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
