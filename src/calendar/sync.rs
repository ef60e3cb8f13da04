//! Calendar sync and import flows.
//!
//! Sync is fetch-all/upsert-all into the event cache; import turns
//! cached events into tasks. Neither keeps an incremental cursor beyond
//! the remote API's own pagination.

use chrono::{DateTime, Datelike, FixedOffset, Months, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::calendar::client::{CalendarClient, RemoteEvent};
use crate::calendar::model::CachedEvent;
use crate::error::CalendarError;
use crate::store::Database;
use crate::tasks::codes::derived_code;
use crate::tasks::model::Task;

/// Source name stamped on imported tasks.
pub const IMPORT_SOURCE: &str = "google-calendar";

/// Sync window length past "now".
const SYNC_WINDOW_MONTHS: u32 = 6;

/// Outcome of a sync run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub calendars: u32,
    pub events_upserted: usize,
}

/// Outcome of an import run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub tasks_upserted: usize,
    pub skipped: usize,
}

/// Compute the `[since, now + 6 months)` sync window.
///
/// `sync_since` is a `YYYY-MM` month; absent or unparsable values fall
/// back to the first day of the current month.
pub fn sync_window(sync_since: Option<&str>, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let since_date = sync_since
        .and_then(|s| NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d").ok())
        .unwrap_or_else(|| {
            NaiveDate::from_ymd_opt(now.year(), now.month(), 1).expect("current month exists")
        });
    let since = since_date
        .and_hms_opt(0, 0, 0)
        .expect("midnight exists")
        .and_utc();
    let until = now
        .checked_add_months(Months::new(SYNC_WINDOW_MONTHS))
        .unwrap_or(now);
    (since, until)
}

/// Pull events from every configured calendar into the cache, then
/// stamp the config's last-synced timestamp.
pub async fn sync_group(
    db: &dyn Database,
    client: &CalendarClient,
    group_id: &str,
) -> Result<SyncReport, CalendarError> {
    let config = db
        .get_calendar_config(group_id)
        .await?
        .ok_or_else(|| CalendarError::NotConfigured(format!("no calendar config for group {group_id}")))?;

    let now = Utc::now();
    let (time_min, time_max) = sync_window(config.sync_since.as_deref(), now);

    let mut report = SyncReport::default();
    for slot in config.slots() {
        report.calendars += 1;
        let items = client
            .list_events(&slot.calendar_id, time_min, time_max)
            .await?;

        for payload in items {
            let Some(event_id) = payload.get("id").and_then(|v| v.as_str()) else {
                warn!(calendar_id = %slot.calendar_id, "Skipping remote event without id");
                continue;
            };
            let etag = payload
                .get("etag")
                .and_then(|v| v.as_str())
                .map(String::from);

            db.upsert_calendar_event(&CachedEvent {
                group_id: group_id.to_string(),
                calendar_id: slot.calendar_id.clone(),
                event_id: event_id.to_string(),
                etag,
                payload,
                updated_at: now,
            })
            .await?;
            report.events_upserted += 1;
        }
    }

    db.set_last_synced(group_id, now).await?;
    info!(
        group_id,
        calendars = report.calendars,
        events = report.events_upserted,
        "Calendar sync complete"
    );
    Ok(report)
}

/// Turn cached events into tasks: one task per event whose color
/// matches the slot's filter, upserted by the derived code.
pub async fn import_group(
    db: &dyn Database,
    group_id: &str,
    tz: FixedOffset,
) -> Result<ImportReport, CalendarError> {
    let config = db
        .get_calendar_config(group_id)
        .await?
        .ok_or_else(|| CalendarError::NotConfigured(format!("no calendar config for group {group_id}")))?;

    db.ensure_group(group_id).await?;

    let mut report = ImportReport::default();
    for slot in config.slots() {
        let cached = db
            .list_calendar_events(group_id, &slot.calendar_id)
            .await?;

        for entry in cached {
            let remote: RemoteEvent = match serde_json::from_value(entry.payload.clone()) {
                Ok(r) => r,
                Err(e) => {
                    warn!(event_id = %entry.event_id, error = %e, "Skipping unparsable cached event");
                    report.skipped += 1;
                    continue;
                }
            };

            if remote.status.as_deref() == Some("cancelled") {
                report.skipped += 1;
                continue;
            }
            if let Some(color) = slot.color_id.as_deref() {
                if remote.color_id.as_deref() != Some(color) {
                    report.skipped += 1;
                    continue;
                }
            }

            let title = remote
                .summary
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "(untitled event)".to_string());
            let mut task = Task::new(group_id, derived_code(&remote.id), title).with_source(
                IMPORT_SOURCE,
                remote.id.clone(),
                remote.html_link.clone(),
            );
            task.description = remote.description.clone();
            task.due_at = remote.start.as_ref().and_then(|start| event_due(start, tz));
            if let Some(tag) = slot.tag.clone() {
                task.tags = vec![tag];
            }

            db.upsert_task_by_code(&task).await?;
            report.tasks_upserted += 1;
        }
    }

    info!(
        group_id,
        imported = report.tasks_upserted,
        skipped = report.skipped,
        "Calendar import complete"
    );
    Ok(report)
}

/// Due timestamp for an event start: all-day dates become local
/// midnight, timed starts are taken as-is.
fn event_due(
    start: &crate::calendar::client::EventTime,
    tz: FixedOffset,
) -> Option<DateTime<Utc>> {
    if let Some(dt) = start.date_time.as_deref() {
        return DateTime::parse_from_rfc3339(dt)
            .ok()
            .map(|dt| dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(start.date.as_deref()?, "%Y-%m-%d").ok()?;
    crate::channels::commands::local_midnight(date, tz)
}
