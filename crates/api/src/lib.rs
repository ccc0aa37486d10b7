use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use switchboard_core::{Intent, RouterConfig};
use switchboard_router::{HealthReport, IntentRouter};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

const MAX_QUERY_LEN: usize = 2_000;

#[derive(Clone)]
pub struct ApiState {
    pub router: Arc<IntentRouter>,
}

#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub query: String,
    pub predicted_intent: Intent,
    pub actual_intent: Intent,
    pub was_correct: bool,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    timestamp_utc: String,
    #[serde(flatten)]
    report: HealthReport,
}

pub async fn build_app(config: RouterConfig) -> Result<Router> {
    let router = IntentRouter::build(config).await?;
    Ok(build_router(ApiState {
        router: Arc::new(router),
    }))
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/classify", post(classify))
        .route("/v1/feedback", post(feedback))
        .route("/v1/stats", get(stats))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(RequestBodyLimitLayer::new(64 * 1024))
        .with_state(state)
}

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let report = state.router.health_check();
    let status = if report.status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let payload = HealthResponse {
        timestamp_utc: chrono::Utc::now().to_rfc3339(),
        report,
    };
    (status, Json(payload))
}

async fn classify(
    State(state): State<ApiState>,
    Json(request): Json<ClassifyRequest>,
) -> impl IntoResponse {
    if request.text.chars().count() > MAX_QUERY_LEN {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "text_too_long",
                "max_chars": MAX_QUERY_LEN
            })),
        )
            .into_response();
    }

    let result = state.router.classify(&request.text).await;
    (StatusCode::OK, Json(result)).into_response()
}

async fn feedback(
    State(state): State<ApiState>,
    Json(request): Json<FeedbackRequest>,
) -> impl IntoResponse {
    if request.query.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "empty_query"
            })),
        )
            .into_response();
    }

    match state
        .router
        .record_feedback(
            &request.query,
            request.predicted_intent,
            request.actual_intent,
            request.was_correct,
        )
        .await
    {
        Ok(outcome) => (StatusCode::ACCEPTED, Json(outcome)).into_response(),
        Err(error) => {
            warn!(error = %error, "feedback retrain failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "error": "retrain_failed",
                    "message": error.to_string()
                })),
            )
                .into_response()
        }
    }
}

async fn stats(State(state): State<ApiState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.router.stats()))
}
