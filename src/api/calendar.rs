//! Calendar configuration and sync/import/create handlers.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Deserialize;
use tracing::info;

use crate::api::{ApiError, AppState, require_admin};
use crate::calendar::client::{EventTime, NewEvent};
use crate::calendar::model::{CalendarConfig, CalendarSlot};
use crate::calendar::sync;

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

/// GET /api/calendar/config?group=…
pub async fn get_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<GroupQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers, query.key.as_deref())?;
    let group = require_group(query.group)?;

    match state.db.get_calendar_config(&group).await? {
        Some(config) => Ok(Json(config)),
        None => Err(ApiError::NotFound(format!(
            "no calendar config for group {group}"
        ))),
    }
}

#[derive(Debug, Deserialize)]
pub struct PutConfigBody {
    group: Option<String>,
    #[serde(default)]
    calendar_one: Option<CalendarSlot>,
    #[serde(default)]
    calendar_two: Option<CalendarSlot>,
    #[serde(default)]
    sync_since: Option<String>,
    #[serde(default)]
    timezone: Option<String>,
}

/// PUT /api/calendar/config — upserts the whole row.
pub async fn put_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<KeyQuery>,
    Json(body): Json<PutConfigBody>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers, query.key.as_deref())?;
    let group = require_group(body.group)?;

    if let Some(since) = body.sync_since.as_deref() {
        if NaiveDate::parse_from_str(&format!("{since}-01"), "%Y-%m-%d").is_err() {
            return Err(ApiError::BadRequest(format!(
                "invalid sync_since: {since} (expected YYYY-MM)"
            )));
        }
    }

    let mut config = CalendarConfig::new(group.as_str());
    config.calendar_one = body.calendar_one;
    config.calendar_two = body.calendar_two;
    config.sync_since = body.sync_since;
    if let Some(timezone) = body.timezone.filter(|t| !t.is_empty()) {
        config.timezone = timezone;
    }

    state.db.ensure_group(&group).await?;
    state.db.upsert_calendar_config(&config).await?;
    info!(group_id = %group, "Calendar config updated");

    // Hand back the stored row (it carries last_synced_at).
    match state.db.get_calendar_config(&group).await? {
        Some(stored) => Ok(Json(stored)),
        None => Ok(Json(config)),
    }
}

/// POST /api/calendar/sync?group=…
pub async fn sync(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<GroupQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers, query.key.as_deref())?;
    let group = require_group(query.group)?;

    let client = state
        .calendar
        .as_ref()
        .ok_or_else(|| ApiError::BadRequest("calendar integration is disabled".into()))?;

    let report = sync::sync_group(state.db.as_ref(), client, &group).await?;
    Ok(Json(report))
}

/// POST /api/calendar/import?group=…
pub async fn import(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<GroupQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers, query.key.as_deref())?;
    let group = require_group(query.group)?;

    let report = sync::import_group(state.db.as_ref(), &group, state.tz).await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct CreateEventBody {
    group: Option<String>,
    /// Which configured slot to write to: "one" (default) or "two".
    #[serde(default)]
    calendar: Option<String>,
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    /// All-day date, `YYYY-MM-DD`. Mutually exclusive with `start`.
    #[serde(default)]
    date: Option<String>,
    /// Timed start, RFC 3339.
    #[serde(default)]
    start: Option<String>,
    /// Timed end, RFC 3339. Defaults to one hour after `start`.
    #[serde(default)]
    end: Option<String>,
    #[serde(default)]
    color_id: Option<String>,
}

/// POST /api/calendar/events — create an event in a configured remote
/// calendar.
pub async fn create_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<KeyQuery>,
    Json(body): Json<CreateEventBody>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers, query.key.as_deref())?;
    let group = require_group(body.group)?;

    let client = state
        .calendar
        .as_ref()
        .ok_or_else(|| ApiError::BadRequest("calendar integration is disabled".into()))?;

    let config = state
        .db
        .get_calendar_config(&group)
        .await?
        .ok_or_else(|| ApiError::BadRequest(format!("no calendar config for group {group}")))?;

    let slot = match body.calendar.as_deref().unwrap_or("one") {
        "one" => config.calendar_one.as_ref(),
        "two" => config.calendar_two.as_ref(),
        other => {
            return Err(ApiError::BadRequest(format!(
                "unknown calendar slot: {other} (expected one or two)"
            )));
        }
    }
    .ok_or_else(|| ApiError::BadRequest("requested calendar slot is not configured".into()))?;

    let title = body
        .title
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing title".into()))?;

    let (start, end) = event_times(body.date.as_deref(), body.start.as_deref(), body.end.as_deref())?;

    let event = NewEvent {
        summary: title.trim().to_string(),
        description: body.description.filter(|d| !d.is_empty()),
        start,
        end,
        color_id: body.color_id.or_else(|| slot.color_id.clone()),
    };

    let created = client.insert_event(&slot.calendar_id, &event).await?;
    info!(group_id = %group, event_id = %created.id, "Remote calendar event created");
    Ok(Json(created))
}

/// Build start/end times from the body: either an all-day `date` or a
/// timed `start` (+ optional `end`).
fn event_times(
    date: Option<&str>,
    start: Option<&str>,
    end: Option<&str>,
) -> Result<(EventTime, EventTime), ApiError> {
    if let Some(date) = date {
        let day = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|_| ApiError::BadRequest(format!("invalid date: {date}")))?;
        let next = day + Duration::days(1);
        return Ok((
            EventTime {
                date: Some(day.format("%Y-%m-%d").to_string()),
                ..Default::default()
            },
            EventTime {
                date: Some(next.format("%Y-%m-%d").to_string()),
                ..Default::default()
            },
        ));
    }

    let start = start.ok_or_else(|| ApiError::BadRequest("missing date or start".into()))?;
    let start_dt = DateTime::parse_from_rfc3339(start)
        .map_err(|_| ApiError::BadRequest(format!("invalid start: {start} (expected RFC 3339)")))?
        .with_timezone(&Utc);

    let end_dt = match end {
        Some(end) => DateTime::parse_from_rfc3339(end)
            .map_err(|_| ApiError::BadRequest(format!("invalid end: {end} (expected RFC 3339)")))?
            .with_timezone(&Utc),
        None => start_dt + Duration::hours(1),
    };
    if end_dt <= start_dt {
        return Err(ApiError::BadRequest("end must be after start".into()));
    }

    Ok((
        EventTime {
            date_time: Some(start_dt.to_rfc3339()),
            ..Default::default()
        },
        EventTime {
            date_time: Some(end_dt.to_rfc3339()),
            ..Default::default()
        },
    ))
}
