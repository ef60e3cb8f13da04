//! Unified `Database` trait — single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::calendar::model::{CachedEvent, CalendarConfig};
use crate::error::DatabaseError;
use crate::tasks::model::{Task, TaskFilter, TaskPatch};

/// Per-status task counts for a group (dashboard chart data).
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusCounts {
    pub open: u32,
    pub in_progress: u32,
    pub done: u32,
    pub cancelled: u32,
}

/// Backend-agnostic database trait covering groups, tasks, calendar
/// configuration, and the remote-event cache.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Groups ──────────────────────────────────────────────────────

    /// Create the group row if it doesn't exist yet. Groups come into
    /// being implicitly when a task or calendar config references them.
    async fn ensure_group(&self, group_id: &str) -> Result<(), DatabaseError>;

    // ── Tasks ───────────────────────────────────────────────────────

    /// Insert a new task. A duplicate (group, code) pair surfaces as
    /// [`DatabaseError::Constraint`] so the allocator can retry.
    async fn insert_task(&self, task: &Task) -> Result<(), DatabaseError>;

    /// Insert-or-update keyed by (group, code). Used by calendar import,
    /// where the code is derived and re-imports must land on the same row.
    async fn upsert_task_by_code(&self, task: &Task) -> Result<(), DatabaseError>;

    /// Get a task by ID.
    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, DatabaseError>;

    /// Get a task by its group-scoped code.
    async fn get_task_by_code(
        &self,
        group_id: &str,
        code: &str,
    ) -> Result<Option<Task>, DatabaseError>;

    /// List tasks in a group, filtered, ordered by due date then code.
    async fn list_tasks(
        &self,
        group_id: &str,
        filter: &TaskFilter,
    ) -> Result<Vec<Task>, DatabaseError>;

    /// Apply a partial update; `None` fields are left unchanged.
    /// Returns the updated task, or `None` when the id doesn't exist.
    async fn update_task(&self, id: Uuid, patch: &TaskPatch)
    -> Result<Option<Task>, DatabaseError>;

    /// Delete a task. Returns whether a row was actually removed.
    async fn delete_task(&self, id: Uuid) -> Result<bool, DatabaseError>;

    /// Count tasks per status within a group.
    async fn task_status_counts(&self, group_id: &str) -> Result<StatusCounts, DatabaseError>;

    // ── Calendar configuration ──────────────────────────────────────

    /// Get the calendar config for a group.
    async fn get_calendar_config(
        &self,
        group_id: &str,
    ) -> Result<Option<CalendarConfig>, DatabaseError>;

    /// Upsert the whole calendar config row for a group.
    async fn upsert_calendar_config(&self, config: &CalendarConfig) -> Result<(), DatabaseError>;

    /// Record a completed sync.
    async fn set_last_synced(
        &self,
        group_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    // ── Calendar event cache ────────────────────────────────────────

    /// Upsert a cached remote event, keyed by (group, calendar, event id).
    async fn upsert_calendar_event(&self, event: &CachedEvent) -> Result<(), DatabaseError>;

    /// List cached events for one calendar of a group.
    async fn list_calendar_events(
        &self,
        group_id: &str,
        calendar_id: &str,
    ) -> Result<Vec<CachedEvent>, DatabaseError>;
}
