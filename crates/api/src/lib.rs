mod rate_limit;

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{Json, State};
use axum::http::{Method, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{body::Body, Router};
use parking_lot::RwLock;
use promptgate_config::{ConfigLoader, ConfigPaths, ConfigSummary};
use promptgate_core::{
    DataAvailability, FallbackDecision, IntentSelection, PromptRequest, ScopeAssessment,
};
use promptgate_observability::{DecisionLog, MetricsSnapshot, PipelineMetrics};
use promptgate_pipeline::{Pipeline, PipelineRequest};
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub use crate::rate_limit::ClientRateLimiter;

const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct ApiState {
    pub pipeline: Arc<RwLock<Arc<Pipeline>>>,
    pub config_paths: ConfigPaths,
    pub api_key: String,
    pub limiter: ClientRateLimiter,
}

impl ApiState {
    pub fn new(pipeline: Pipeline, config_paths: ConfigPaths, api_key: impl Into<String>) -> Self {
        Self {
            pipeline: Arc::new(RwLock::new(Arc::new(pipeline))),
            config_paths,
            api_key: api_key.into(),
            limiter: ClientRateLimiter::new(Duration::from_secs(60), 120),
        }
    }

    pub fn with_limiter(mut self, limiter: ClientRateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    /// The pipeline in effect right now; reloads never disturb a request that
    /// already holds one.
    pub fn current(&self) -> Arc<Pipeline> {
        self.pipeline.read().clone()
    }

    pub fn reload(&self) -> Result<ConfigSummary> {
        let snapshot = ConfigLoader::load(&self.config_paths)
            .context("failed to reload configuration")?;
        let summary = snapshot.summary();
        let next = self.current().reconfigure(Arc::new(snapshot));
        *self.pipeline.write() = Arc::new(next);
        Ok(summary)
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp_utc: String,
    metrics: MetricsSnapshot,
    config: ConfigSummary,
}

#[derive(Debug, Deserialize)]
struct ClassifyRequest {
    #[serde(default)]
    query: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteRequest {
    #[serde(default)]
    query: String,
    #[serde(default)]
    data_availability: DataAvailability,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RouteResponse {
    intent: IntentSelection,
    scope: ScopeAssessment,
    decision: Option<FallbackDecision>,
}

#[derive(Debug, Serialize)]
struct ReloadResponse {
    status: &'static str,
    config: ConfigSummary,
}

pub fn build_app(config_dir: impl AsRef<Path>) -> Result<Router> {
    let config_paths = ConfigPaths::from_dir(config_dir.as_ref());
    let snapshot = ConfigLoader::load(&config_paths).with_context(|| {
        format!(
            "failed to load configuration from {}",
            config_dir.as_ref().display()
        )
    })?;

    let mut pipeline = Pipeline::new(Arc::new(snapshot), PipelineMetrics::shared());
    if let Ok(log_dir) = env::var("PROMPTGATE_LOG_DIR") {
        pipeline = pipeline.with_decision_log(DecisionLog::new(PathBuf::from(log_dir)));
    }

    let api_key =
        env::var("PROMPTGATE_API_KEY").unwrap_or_else(|_| "dev-promptgate-key".to_string());
    let rate_limit_window = Duration::from_secs(
        env::var("PROMPTGATE_RATE_LIMIT_WINDOW_SECONDS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(60),
    );
    let rate_limit_max = env::var("PROMPTGATE_RATE_LIMIT_MAX")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(120);

    let state = ApiState::new(pipeline, config_paths, api_key)
        .with_limiter(ClientRateLimiter::new(rate_limit_window, rate_limit_max));

    Ok(build_router(state))
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/classify", post(classify))
        .route("/v1/route", post(route))
        .route("/v1/prompt", post(prompt))
        .route("/v1/pipeline", post(pipeline))
        .route("/v1/admin/reload", post(reload))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api_key_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .with_state(state)
}

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let pipeline = state.current();
    let payload = HealthResponse {
        status: "ok",
        timestamp_utc: chrono::Utc::now().to_rfc3339(),
        metrics: pipeline.metrics().snapshot(),
        config: pipeline.config().summary(),
    };
    (StatusCode::OK, Json(payload))
}

async fn classify(
    State(state): State<ApiState>,
    Json(request): Json<ClassifyRequest>,
) -> impl IntoResponse {
    let selection = state.current().classify(&request.query);
    (StatusCode::OK, Json(selection))
}

async fn route(
    State(state): State<ApiState>,
    Json(request): Json<RouteRequest>,
) -> impl IntoResponse {
    let pipeline = state.current();
    let intent = pipeline.classify(&request.query);
    let input = promptgate_core::ScopeInput::new(&intent, request.data_availability);
    let scope = promptgate_core::detect_out_of_scope(&input);
    let decision = promptgate_core::route(&input, &pipeline.config().policies.policies);

    (
        StatusCode::OK,
        Json(RouteResponse {
            intent,
            scope,
            decision,
        }),
    )
}

async fn prompt(
    State(state): State<ApiState>,
    Json(request): Json<PromptRequest>,
) -> impl IntoResponse {
    let render = state.current().render(&request);
    (StatusCode::OK, Json(render))
}

async fn pipeline(
    State(state): State<ApiState>,
    Json(request): Json<PipelineRequest>,
) -> impl IntoResponse {
    let response = state.current().handle(&request);
    (StatusCode::OK, Json(response))
}

async fn reload(State(state): State<ApiState>) -> Response {
    match state.reload() {
        Ok(config) => {
            info!(
                intents = config.intents,
                policies = config.policies,
                "configuration reloaded"
            );
            (
                StatusCode::OK,
                Json(ReloadResponse {
                    status: "reloaded",
                    config,
                }),
            )
                .into_response()
        }
        Err(err) => {
            warn!(error = %format!("{err:#}"), "configuration reload failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "error": "reload_failed",
                    "message": format!("{err:#}")
                })),
            )
                .into_response()
        }
    }
}

fn is_public_endpoint(path: &str) -> bool {
    matches!(path, "/health")
}

async fn api_key_middleware(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS || is_public_endpoint(request.uri().path()) {
        return next.run(request).await;
    }

    let header_key = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if header_key != state.api_key {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": "unauthorized",
                "message": "missing or invalid x-api-key"
            })),
        )
            .into_response();
    }

    next.run(request).await
}

async fn rate_limit_middleware(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS || is_public_endpoint(request.uri().path()) {
        return next.run(request).await;
    }

    let ip = request_ip(&request);
    if !state.limiter.allow(&ip) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({
                "error": "rate_limited",
                "message": "rate limit exceeded for this client"
            })),
        )
            .into_response();
    }

    next.run(request).await
}

fn request_ip(request: &Request<Body>) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "local".to_string())
}
