//! HTTP surface: `POST /translate`, `GET /health`, `GET /metrics`.
//! Errors are returned as `{"detail": "..."}`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::metrics::MetricSummary;
use crate::translate::{TranslationRequest, TranslationResult, TranslationService, UpstreamError};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<TranslationService>,
}

impl AppState {
    pub fn new(service: Arc<TranslationService>) -> Self {
        Self { service }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidRequest(rejection.body_text())
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    cache: &'static str,
    telemetry: &'static str,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/translate", post(translate))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `shutdown` is cancelled, then let in-flight requests finish.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "http server listening");
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn translate(
    State(state): State<AppState>,
    payload: Result<Json<TranslationRequest>, JsonRejection>,
) -> Result<Json<TranslationResult>, ApiError> {
    let Json(request) = payload?;
    if request.text.is_empty() {
        return Err(ApiError::InvalidRequest("text must not be empty".into()));
    }

    match state.service.translate(request).await {
        Ok(result) => Ok(Json(result)),
        Err(e) => {
            error!(error = %e, "translation failed");
            Err(ApiError::Upstream(e))
        }
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        cache: state.service.cache_backend(),
        telemetry: state.service.telemetry_backend(),
    })
}

async fn metrics(State(state): State<AppState>) -> Json<HashMap<String, MetricSummary>> {
    Json(state.service.metrics().summary())
}
