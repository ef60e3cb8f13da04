//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. All timestamps are
//! stored as RFC 3339 text.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::calendar::model::{CachedEvent, CalendarConfig, CalendarSlot};
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{Database, StatusCounts};
use crate::tasks::model::{Task, TaskFilter, TaskPatch, TaskPriority, TaskStatus};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Convert `Option<String>` to libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

/// Map a write error, distinguishing uniqueness violations so the code
/// allocator can retry on them.
fn map_write_err(op: &str, e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("UNIQUE constraint failed") {
        DatabaseError::Constraint(format!("{op}: {msg}"))
    } else {
        DatabaseError::Query(format!("{op}: {msg}"))
    }
}

const TASK_COLUMNS: &str = "id, group_id, code, title, description, due_at, status, progress, priority, tags, source, external_id, external_ref, created_at, updated_at";

/// Map a libsql Row to a Task. Column order matches TASK_COLUMNS.
fn row_to_task(row: &libsql::Row) -> Result<Task, libsql::Error> {
    let id_str: String = row.get(0)?;
    let due_str: Option<String> = row.get(5).ok();
    let status_str: String = row.get(6)?;
    let progress: i64 = row.get(7)?;
    let priority_str: String = row.get(8)?;
    let tags_str: String = row.get::<String>(9).unwrap_or_else(|_| "[]".into());
    let created_str: String = row.get(13)?;
    let updated_str: String = row.get(14)?;

    Ok(Task {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        group_id: row.get(1)?,
        code: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4).ok(),
        due_at: parse_optional_datetime(&due_str),
        status: TaskStatus::from_str_lossy(&status_str),
        progress: progress.clamp(0, 100) as u8,
        priority: TaskPriority::from_str_lossy(&priority_str),
        tags: serde_json::from_str(&tags_str).unwrap_or_default(),
        source: row.get(10).ok(),
        external_id: row.get(11).ok(),
        external_ref: row.get(12).ok(),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

const CONFIG_COLUMNS: &str = "group_id, calendar_one_id, calendar_one_tag, calendar_one_color, calendar_two_id, calendar_two_tag, calendar_two_color, sync_since, timezone, last_synced_at, updated_at";

/// Map a libsql Row to a CalendarConfig. Column order matches CONFIG_COLUMNS.
fn row_to_config(row: &libsql::Row) -> Result<CalendarConfig, libsql::Error> {
    let slot = |id_idx: i32, tag_idx: i32, color_idx: i32| -> Option<CalendarSlot> {
        let calendar_id: Option<String> = row.get(id_idx).ok();
        let calendar_id = calendar_id.filter(|s| !s.is_empty())?;
        Some(CalendarSlot {
            calendar_id,
            tag: row.get(tag_idx).ok(),
            color_id: row.get(color_idx).ok(),
        })
    };

    let last_synced_str: Option<String> = row.get(9).ok();
    let updated_str: String = row.get(10)?;

    Ok(CalendarConfig {
        group_id: row.get(0)?,
        calendar_one: slot(1, 2, 3),
        calendar_two: slot(4, 5, 6),
        sync_since: row.get(7).ok(),
        timezone: row
            .get::<String>(8)
            .unwrap_or_else(|_| "Asia/Bangkok".into()),
        last_synced_at: parse_optional_datetime(&last_synced_str),
        updated_at: parse_datetime(&updated_str),
    })
}

const EVENT_COLUMNS: &str = "group_id, calendar_id, event_id, etag, payload, updated_at";

/// Map a libsql Row to a CachedEvent. Column order matches EVENT_COLUMNS.
fn row_to_event(row: &libsql::Row) -> Result<CachedEvent, libsql::Error> {
    let payload_str: String = row.get(4)?;
    let updated_str: String = row.get(5)?;

    Ok(CachedEvent {
        group_id: row.get(0)?,
        calendar_id: row.get(1)?,
        event_id: row.get(2)?,
        etag: row.get(3).ok(),
        payload: serde_json::from_str(&payload_str).unwrap_or(serde_json::Value::Null),
        updated_at: parse_datetime(&updated_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Groups ──────────────────────────────────────────────────────

    async fn ensure_group(&self, group_id: &str) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO groups (id, created_at) VALUES (?1, ?2)",
            params![group_id, Utc::now().to_rfc3339()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("ensure_group: {e}")))?;
        Ok(())
    }

    // ── Tasks ───────────────────────────────────────────────────────

    async fn insert_task(&self, task: &Task) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let tags_json = serde_json::to_string(&task.tags)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO tasks (id, group_id, code, title, description, due_at, status, progress, priority, tags, source, external_id, external_ref, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                task.id.to_string(),
                task.group_id.clone(),
                task.code.clone(),
                task.title.clone(),
                opt_text(task.description.as_deref()),
                opt_text_owned(task.due_at.map(|dt| dt.to_rfc3339())),
                task.status.as_str(),
                task.progress as i64,
                task.priority.as_str(),
                tags_json,
                opt_text(task.source.as_deref()),
                opt_text(task.external_id.as_deref()),
                opt_text(task.external_ref.as_deref()),
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| map_write_err("insert_task", e))?;

        debug!(task_id = %task.id, group_id = %task.group_id, code = %task.code, "Task inserted");
        Ok(())
    }

    async fn upsert_task_by_code(&self, task: &Task) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let tags_json = serde_json::to_string(&task.tags)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        // Status and progress survive the update so a re-import does not
        // reopen a task the group already finished.
        conn.execute(
            "INSERT INTO tasks (id, group_id, code, title, description, due_at, status, progress, priority, tags, source, external_id, external_ref, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
             ON CONFLICT (group_id, code) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                due_at = excluded.due_at,
                priority = excluded.priority,
                tags = excluded.tags,
                source = excluded.source,
                external_id = excluded.external_id,
                external_ref = excluded.external_ref,
                updated_at = excluded.updated_at",
            params![
                task.id.to_string(),
                task.group_id.clone(),
                task.code.clone(),
                task.title.clone(),
                opt_text(task.description.as_deref()),
                opt_text_owned(task.due_at.map(|dt| dt.to_rfc3339())),
                task.status.as_str(),
                task.progress as i64,
                task.priority.as_str(),
                tags_json,
                opt_text(task.source.as_deref()),
                opt_text(task.external_id.as_deref()),
                opt_text(task.external_ref.as_deref()),
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| map_write_err("upsert_task_by_code", e))?;

        debug!(group_id = %task.group_id, code = %task.code, "Task upserted by code");
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_task: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let task = row_to_task(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_task row parse: {e}")))?;
                Ok(Some(task))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_task: {e}"))),
        }
    }

    async fn get_task_by_code(
        &self,
        group_id: &str,
        code: &str,
    ) -> Result<Option<Task>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE group_id = ?1 AND code = ?2"),
                params![group_id, code],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_task_by_code: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let task = row_to_task(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_task_by_code row parse: {e}")))?;
                Ok(Some(task))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_task_by_code: {e}"))),
        }
    }

    async fn list_tasks(
        &self,
        group_id: &str,
        filter: &TaskFilter,
    ) -> Result<Vec<Task>, DatabaseError> {
        let conn = self.conn();

        let mut sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE group_id = ?1");
        let mut args: Vec<libsql::Value> = vec![libsql::Value::Text(group_id.to_string())];

        if let Some(status) = filter.status {
            args.push(libsql::Value::Text(status.as_str().to_string()));
            sql.push_str(&format!(" AND status = ?{}", args.len()));
        }
        if filter.open_only {
            sql.push_str(" AND status IN ('open', 'in_progress')");
        }
        if let Some(from) = filter.due_from {
            args.push(libsql::Value::Text(from.to_rfc3339()));
            sql.push_str(&format!(" AND due_at >= ?{}", args.len()));
        }
        if let Some(until) = filter.due_until {
            args.push(libsql::Value::Text(until.to_rfc3339()));
            sql.push_str(&format!(" AND due_at < ?{}", args.len()));
        }
        sql.push_str(" ORDER BY due_at IS NULL, due_at ASC, code ASC");

        let mut rows = conn
            .query(&sql, libsql::params_from_iter(args))
            .await
            .map_err(|e| DatabaseError::Query(format!("list_tasks: {e}")))?;

        let mut tasks = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_task(&row) {
                Ok(task) => tasks.push(task),
                Err(e) => {
                    tracing::warn!("Skipping task row: {e}");
                }
            }
        }
        Ok(tasks)
    }

    async fn update_task(
        &self,
        id: Uuid,
        patch: &TaskPatch,
    ) -> Result<Option<Task>, DatabaseError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let tags_json = match &patch.tags {
            Some(tags) => Some(
                serde_json::to_string(tags)
                    .map_err(|e| DatabaseError::Serialization(e.to_string()))?,
            ),
            None => None,
        };

        let count = conn
            .execute(
                "UPDATE tasks SET
                    title = COALESCE(?1, title),
                    description = COALESCE(?2, description),
                    due_at = COALESCE(?3, due_at),
                    status = COALESCE(?4, status),
                    progress = COALESCE(?5, progress),
                    priority = COALESCE(?6, priority),
                    tags = COALESCE(?7, tags),
                    updated_at = ?8
                 WHERE id = ?9",
                params![
                    opt_text(patch.title.as_deref()),
                    opt_text(patch.description.as_deref()),
                    opt_text_owned(patch.due_at.map(|dt| dt.to_rfc3339())),
                    opt_text(patch.status.map(|s| s.as_str())),
                    match patch.progress {
                        Some(p) => libsql::Value::Integer(p as i64),
                        None => libsql::Value::Null,
                    },
                    opt_text(patch.priority.map(|p| p.as_str())),
                    opt_text_owned(tags_json),
                    now,
                    id.to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_task: {e}")))?;

        if count == 0 {
            return Ok(None);
        }
        debug!(task_id = %id, "Task updated");
        self.get_task(id).await
    }

    async fn delete_task(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let count = conn
            .execute("DELETE FROM tasks WHERE id = ?1", params![id.to_string()])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_task: {e}")))?;
        Ok(count > 0)
    }

    async fn task_status_counts(&self, group_id: &str) -> Result<StatusCounts, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT status, COUNT(*) FROM tasks WHERE group_id = ?1 GROUP BY status",
                params![group_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("task_status_counts: {e}")))?;

        let mut counts = StatusCounts::default();
        while let Ok(Some(row)) = rows.next().await {
            let status_str: String = row.get(0).unwrap_or_default();
            let count: i64 = row.get(1).unwrap_or(0);
            match status_str.as_str() {
                "open" => counts.open = count as u32,
                "in_progress" => counts.in_progress = count as u32,
                "done" => counts.done = count as u32,
                "cancelled" => counts.cancelled = count as u32,
                _ => {}
            }
        }
        Ok(counts)
    }

    // ── Calendar configuration ──────────────────────────────────────

    async fn get_calendar_config(
        &self,
        group_id: &str,
    ) -> Result<Option<CalendarConfig>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {CONFIG_COLUMNS} FROM calendar_configs WHERE group_id = ?1"),
                params![group_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_calendar_config: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let config = row_to_config(&row).map_err(|e| {
                    DatabaseError::Query(format!("get_calendar_config row parse: {e}"))
                })?;
                Ok(Some(config))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_calendar_config: {e}"))),
        }
    }

    async fn upsert_calendar_config(&self, config: &CalendarConfig) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();

        let slot_cols = |slot: &Option<CalendarSlot>| {
            (
                opt_text_owned(slot.as_ref().map(|s| s.calendar_id.clone())),
                opt_text_owned(slot.as_ref().and_then(|s| s.tag.clone())),
                opt_text_owned(slot.as_ref().and_then(|s| s.color_id.clone())),
            )
        };
        let (one_id, one_tag, one_color) = slot_cols(&config.calendar_one);
        let (two_id, two_tag, two_color) = slot_cols(&config.calendar_two);

        conn.execute(
            "INSERT INTO calendar_configs (group_id, calendar_one_id, calendar_one_tag, calendar_one_color, calendar_two_id, calendar_two_tag, calendar_two_color, sync_since, timezone, last_synced_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT (group_id) DO UPDATE SET
                calendar_one_id = excluded.calendar_one_id,
                calendar_one_tag = excluded.calendar_one_tag,
                calendar_one_color = excluded.calendar_one_color,
                calendar_two_id = excluded.calendar_two_id,
                calendar_two_tag = excluded.calendar_two_tag,
                calendar_two_color = excluded.calendar_two_color,
                sync_since = excluded.sync_since,
                timezone = excluded.timezone,
                updated_at = excluded.updated_at",
            params![
                config.group_id.clone(),
                one_id,
                one_tag,
                one_color,
                two_id,
                two_tag,
                two_color,
                opt_text(config.sync_since.as_deref()),
                config.timezone.clone(),
                opt_text_owned(config.last_synced_at.map(|dt| dt.to_rfc3339())),
                now,
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("upsert_calendar_config: {e}")))?;

        debug!(group_id = %config.group_id, "Calendar config upserted");
        Ok(())
    }

    async fn set_last_synced(
        &self,
        group_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "UPDATE calendar_configs SET last_synced_at = ?1, updated_at = ?1 WHERE group_id = ?2",
            params![at.to_rfc3339(), group_id],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("set_last_synced: {e}")))?;
        Ok(())
    }

    // ── Calendar event cache ────────────────────────────────────────

    async fn upsert_calendar_event(&self, event: &CachedEvent) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let payload = serde_json::to_string(&event.payload)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO calendar_events (group_id, calendar_id, event_id, etag, payload, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (group_id, calendar_id, event_id) DO UPDATE SET
                etag = excluded.etag,
                payload = excluded.payload,
                updated_at = excluded.updated_at",
            params![
                event.group_id.clone(),
                event.calendar_id.clone(),
                event.event_id.clone(),
                opt_text(event.etag.as_deref()),
                payload,
                event.updated_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("upsert_calendar_event: {e}")))?;

        Ok(())
    }

    async fn list_calendar_events(
        &self,
        group_id: &str,
        calendar_id: &str,
    ) -> Result<Vec<CachedEvent>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM calendar_events WHERE group_id = ?1 AND calendar_id = ?2 ORDER BY event_id"
                ),
                params![group_id, calendar_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_calendar_events: {e}")))?;

        let mut events = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_event(&row) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!("Skipping calendar event row: {e}");
                }
            }
        }
        Ok(events)
    }
}
