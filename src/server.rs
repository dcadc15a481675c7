//! HTTP surface: chat intake, run status, health.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::error;
use uuid::Uuid;

use crate::error::IntakeError;
use crate::intake::{ChatRequest, IntakeService};
use crate::store::Ledger;

/// Shared state for the API routes.
#[derive(Clone)]
pub struct AppState {
    pub intake: IntakeService,
    pub ledger: Arc<dyn Ledger>,
}

impl AppState {
    pub fn new(intake: IntakeService) -> Self {
        let ledger = Arc::clone(intake.ledger());
        Self { intake, ledger }
    }
}

impl IntoResponse for IntakeError {
    fn into_response(self) -> Response {
        let status = match &self {
            IntakeError::InvalidMode(_) => StatusCode::BAD_REQUEST,
            IntakeError::Database(_) | IntakeError::Queue(_) => {
                error!(error = %self, "Intake failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

fn not_found(what: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("{what} not found") })),
    )
        .into_response()
}

fn internal_error(err: impl std::fmt::Display) -> Response {
    error!(error = %err, "Request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

/// POST /v1/chat
///
/// Records the message, creates a queued run and enqueues the job.
async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<impl IntoResponse, IntakeError> {
    let now = Utc::now().to_rfc3339();
    let resp = state.intake.submit(req, &now).await?;
    Ok(Json(resp))
}

/// GET /v1/runs/{run_id}
async fn get_run(State(state): State<AppState>, Path(run_id): Path<String>) -> Response {
    let Ok(run_id) = Uuid::parse_str(&run_id) else {
        return not_found("Run");
    };
    match state.ledger.get_run(run_id).await {
        Ok(Some(run)) => Json(run).into_response(),
        Ok(None) => not_found("Run"),
        Err(e) => internal_error(e),
    }
}

/// GET /v1/threads/{thread_id}/messages
async fn list_messages(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Response {
    match state.ledger.get_thread(&thread_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return not_found("Thread"),
        Err(e) => return internal_error(e),
    }
    match state.ledger.list_messages(&thread_id).await {
        Ok(messages) => Json(json!({ "thread_id": thread_id, "messages": messages })).into_response(),
        Err(e) => internal_error(e),
    }
}

/// Build the API router.
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/chat", post(chat))
        .route("/v1/runs/{run_id}", get(get_run))
        .route("/v1/threads/{thread_id}/messages", get(list_messages))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
