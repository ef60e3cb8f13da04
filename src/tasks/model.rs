//! Task data model — the task itself, its enums, and input normalization.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Done,
    Cancelled,
}

impl TaskStatus {
    /// DB string for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Parse a status string from the DB. Unknown values fall back to open.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "in_progress" => TaskStatus::InProgress,
            "done" => TaskStatus::Done,
            "cancelled" => TaskStatus::Cancelled,
            _ => TaskStatus::Open,
        }
    }

    /// Strict whitelist parse for API input.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(TaskStatus::Open),
            "in_progress" => Some(TaskStatus::InProgress),
            "done" => Some(TaskStatus::Done),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    /// True when the task still needs doing.
    pub fn is_open(&self) -> bool {
        matches!(self, TaskStatus::Open | TaskStatus::InProgress)
    }
}

/// Priority whitelist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Normal => "normal",
            TaskPriority::High => "high",
            TaskPriority::Urgent => "urgent",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "low" => TaskPriority::Low,
            "high" => TaskPriority::High,
            "urgent" => TaskPriority::Urgent,
            _ => TaskPriority::Normal,
        }
    }

    /// Strict whitelist parse for API input.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(TaskPriority::Low),
            "normal" => Some(TaskPriority::Normal),
            "high" => Some(TaskPriority::High),
            "urgent" => Some(TaskPriority::Urgent),
            _ => None,
        }
    }
}

/// A single task, scoped to one group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique ID.
    pub id: Uuid,
    /// Owning group.
    pub group_id: String,
    /// 4-digit code, unique within the group.
    pub code: String,
    /// Short title.
    pub title: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional due timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Completion percentage, 0–100.
    pub progress: u8,
    /// Priority.
    pub priority: TaskPriority,
    /// Free-form tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Source system name for imported tasks (e.g. "google-calendar").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// External id within the source system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// External reference (e.g. a link back to the source).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new task with sensible defaults.
    pub fn new(group_id: impl Into<String>, code: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            group_id: group_id.into(),
            code: code.into(),
            title: title.into(),
            description: None,
            due_at: None,
            status: TaskStatus::Open,
            progress: 0,
            priority: TaskPriority::Normal,
            tags: Vec::new(),
            source: None,
            external_id: None,
            external_ref: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder: set description.
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Builder: set due timestamp.
    pub fn with_due_at(mut self, due: DateTime<Utc>) -> Self {
        self.due_at = Some(due);
        self
    }

    /// Builder: set priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Builder: set tags.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Builder: set external-source linkage.
    pub fn with_source(
        mut self,
        source: impl Into<String>,
        external_id: impl Into<String>,
        external_ref: Option<String>,
    ) -> Self {
        self.source = Some(source.into());
        self.external_id = Some(external_id.into());
        self.external_ref = external_ref;
        self
    }
}

/// Validated input for task creation (before code allocation).
#[derive(Debug, Clone)]
pub struct NewTask {
    pub group_id: String,
    pub title: String,
    pub description: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub priority: TaskPriority,
    pub tags: Vec<String>,
}

impl NewTask {
    pub fn new(group_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            title: title.into(),
            description: None,
            due_at: None,
            priority: TaskPriority::Normal,
            tags: Vec::new(),
        }
    }
}

/// Partial update. `None` fields are left unchanged (COALESCE semantics).
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub status: Option<TaskStatus>,
    pub progress: Option<u8>,
    pub priority: Option<TaskPriority>,
    pub tags: Option<Vec<String>>,
}

impl TaskPatch {
    /// True when the patch carries no recognized fields.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.due_at.is_none()
            && self.status.is_none()
            && self.progress.is_none()
            && self.priority.is_none()
            && self.tags.is_none()
    }
}

/// Listing filter for tasks within a group.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    /// Keep only tasks that still need doing (open or in progress).
    pub open_only: bool,
    /// Keep only tasks with `due_from <= due_at < due_until`.
    pub due_from: Option<DateTime<Utc>>,
    pub due_until: Option<DateTime<Utc>>,
}

impl TaskFilter {
    /// Filter for tasks that still need doing.
    pub fn open() -> Self {
        Self {
            open_only: true,
            ..Default::default()
        }
    }
}

/// Tags arrive either as a JSON array or as a comma-separated string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TagsInput {
    List(Vec<String>),
    Csv(String),
}

impl TagsInput {
    /// Normalize to a trimmed, non-empty tag list.
    pub fn normalize(self) -> Vec<String> {
        let raw = match self {
            TagsInput::List(list) => list,
            TagsInput::Csv(csv) => csv.split(',').map(|s| s.to_string()).collect(),
        };
        raw.into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Parse a due-date input: RFC 3339 as-is, or a plain `YYYY-MM-DD`
/// interpreted as midnight at the given offset.
pub fn parse_due_input(s: &str, tz: FixedOffset) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    let midnight = date.and_hms_opt(0, 0, 0)?;
    midnight
        .and_local_timezone(tz)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}
