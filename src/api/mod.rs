//! Admin API surface — shared state, error mapping, route assembly.

pub mod calendar;
pub mod tasks;

use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use chrono::FixedOffset;
use secrecy::{ExposeSecret, SecretString};
use tower_http::cors::CorsLayer;

use crate::calendar::client::CalendarClient;
use crate::channels::line::LineChannel;
use crate::error::{CalendarError, DatabaseError, TaskError};
use crate::store::Database;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    /// Shared secret gating every admin endpoint.
    pub admin_key: SecretString,
    /// Fixed offset for date interpretation (bot and plain-date inputs).
    pub tz: FixedOffset,
    /// LINE channel (None if the webhook is disabled).
    pub line: Option<Arc<LineChannel>>,
    /// Google Calendar client (None if the integration is disabled).
    pub calendar: Option<Arc<CalendarClient>>,
}

impl AppState {
    /// Check the admin key from a query parameter or the `x-admin-key`
    /// header.
    pub fn key_matches(&self, presented: Option<&str>) -> bool {
        matches!(presented, Some(k) if k == self.admin_key.expose_secret())
    }
}

/// Require the admin key, taken from the `key` query parameter or the
/// `x-admin-key` header.
pub fn require_admin(
    state: &AppState,
    headers: &axum::http::HeaderMap,
    query_key: Option<&str>,
) -> Result<(), ApiError> {
    let presented =
        query_key.or_else(|| headers.get("x-admin-key").and_then(|v| v.to_str().ok()));
    if state.key_matches(presented) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

/// Uniform error responses: plain-text bodies with the right status.
/// Database messages are surfaced directly.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, "unauthorized".to_string()).into_response()
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response()
            }
        }
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<TaskError> for ApiError {
    fn from(e: TaskError) -> Self {
        match e {
            TaskError::Database(db) => db.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<CalendarError> for ApiError {
    fn from(e: CalendarError) -> Self {
        match e {
            CalendarError::NotConfigured(msg) => ApiError::BadRequest(msg),
            CalendarError::Database(db) => db.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// Build the admin API router. CORS is permissive; the dashboard is
/// served from a different origin and every endpoint is key-gated.
pub fn admin_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/tasks", get(tasks::list_tasks).post(tasks::create_task))
        .route("/api/tasks/stats", get(tasks::task_stats))
        .route(
            "/api/tasks/{id}",
            get(tasks::get_task)
                .patch(tasks::patch_task)
                .delete(tasks::delete_task),
        )
        .route(
            "/api/calendar/config",
            get(calendar::get_config).put(calendar::put_config),
        )
        .route("/api/calendar/sync", post(calendar::sync))
        .route("/api/calendar/import", post(calendar::import))
        .route("/api/calendar/events", post(calendar::create_event))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "service": "taskbot"
    }))
}
