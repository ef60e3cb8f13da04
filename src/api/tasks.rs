//! Task CRUD handlers.
//!
//! Bodies use loose field types (strings, raw JSON) and validate by
//! hand so every input problem comes back as a 400 with a description
//! instead of a framework rejection.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::api::{ApiError, AppState, require_admin};
use crate::tasks::model::{
    NewTask, TagsInput, TaskFilter, TaskPatch, TaskPriority, TaskStatus, parse_due_input,
};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    group: Option<String>,
    status: Option<String>,
    key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GroupQuery {
    group: Option<String>,
    key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct KeyQuery {
    key: Option<String>,
}

fn require_group(group: Option<String>) -> Result<String, ApiError> {
    group
        .filter(|g| !g.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing group parameter".into()))
}

fn parse_task_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|_| ApiError::BadRequest(format!("invalid task id: {id}")))
}

/// GET /api/tasks?group=…&status=…
pub async fn list_tasks(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers, query.key.as_deref())?;
    let group = require_group(query.group)?;

    let mut filter = TaskFilter::default();
    if let Some(status) = query.status.as_deref() {
        filter.status = Some(
            TaskStatus::parse(status)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown status: {status}")))?,
        );
    }

    let tasks = state.db.list_tasks(&group, &filter).await?;
    Ok(Json(tasks))
}

/// GET /api/tasks/stats?group=…
pub async fn task_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<GroupQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers, query.key.as_deref())?;
    let group = require_group(query.group)?;

    let counts = state.db.task_status_counts(&group).await?;
    Ok(Json(counts))
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskBody {
    group: Option<String>,
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    due: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    tags: Option<serde_json::Value>,
}

/// POST /api/tasks
pub async fn create_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<KeyQuery>,
    Json(body): Json<CreateTaskBody>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers, query.key.as_deref())?;

    let group = require_group(body.group)?;
    let title = body
        .title
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing title".into()))?;

    let mut new = NewTask::new(group, title.trim());
    new.description = body.description.filter(|d| !d.is_empty());
    if let Some(due) = body.due.as_deref() {
        new.due_at = Some(parse_due_input(due, state.tz).ok_or_else(|| {
            ApiError::BadRequest(format!("invalid due date: {due} (expected RFC 3339 or YYYY-MM-DD)"))
        })?);
    }
    if let Some(priority) = body.priority.as_deref() {
        new.priority = TaskPriority::parse(priority)
            .ok_or_else(|| ApiError::BadRequest(format!("unknown priority: {priority}")))?;
    }
    if let Some(tags) = body.tags {
        new.tags = parse_tags(tags)?;
    }

    let task = crate::tasks::allocate_task(state.db.as_ref(), new).await?;
    info!(group_id = %task.group_id, code = %task.code, "Task created via admin API");
    Ok(Json(task))
}

/// GET /api/tasks/{id}
pub async fn get_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<KeyQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers, query.key.as_deref())?;
    let id = parse_task_id(&id)?;

    match state.db.get_task(id).await? {
        Some(task) => Ok(Json(task)),
        None => Err(ApiError::NotFound(format!("no task with id {id}"))),
    }
}

#[derive(Debug, Deserialize)]
pub struct PatchTaskBody {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    due: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    progress: Option<i64>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    tags: Option<serde_json::Value>,
}

/// PATCH /api/tasks/{id} — absent fields stay unchanged.
pub async fn patch_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<KeyQuery>,
    Json(body): Json<PatchTaskBody>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers, query.key.as_deref())?;
    let id = parse_task_id(&id)?;

    let mut patch = TaskPatch {
        title: body.title.filter(|t| !t.trim().is_empty()),
        description: body.description,
        ..Default::default()
    };
    if let Some(due) = body.due.as_deref() {
        patch.due_at = Some(parse_due_input(due, state.tz).ok_or_else(|| {
            ApiError::BadRequest(format!("invalid due date: {due} (expected RFC 3339 or YYYY-MM-DD)"))
        })?);
    }
    if let Some(status) = body.status.as_deref() {
        patch.status = Some(
            TaskStatus::parse(status)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown status: {status}")))?,
        );
    }
    if let Some(progress) = body.progress {
        if !(0..=100).contains(&progress) {
            return Err(ApiError::BadRequest(format!(
                "progress must be 0–100, got {progress}"
            )));
        }
        patch.progress = Some(progress as u8);
    }
    if let Some(priority) = body.priority.as_deref() {
        patch.priority = Some(
            TaskPriority::parse(priority)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown priority: {priority}")))?,
        );
    }
    if let Some(tags) = body.tags {
        patch.tags = Some(parse_tags(tags)?);
    }

    match state.db.update_task(id, &patch).await? {
        Some(task) => Ok(Json(task)),
        None => Err(ApiError::NotFound(format!("no task with id {id}"))),
    }
}

/// DELETE /api/tasks/{id} — idempotent; deleting a missing id succeeds.
pub async fn delete_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<KeyQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers, query.key.as_deref())?;
    let id = parse_task_id(&id)?;

    let deleted = state.db.delete_task(id).await?;
    if deleted {
        info!(task_id = %id, "Task deleted via admin API");
    }
    Ok((
        StatusCode::OK,
        Json(serde_json::json!({ "ok": true, "deleted": deleted })),
    ))
}

/// Tags arrive as a JSON array or a comma-separated string.
fn parse_tags(value: serde_json::Value) -> Result<Vec<String>, ApiError> {
    let input: TagsInput = serde_json::from_value(value)
        .map_err(|_| ApiError::BadRequest("tags must be a string array or comma-separated string".into()))?;
    Ok(input.normalize())
}
