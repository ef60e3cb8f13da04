//! Calendar configuration and event-cache models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One configured calendar: the remote id plus how imported tasks
/// from it are labeled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarSlot {
    /// Remote calendar identifier.
    pub calendar_id: String,
    /// Tag applied to tasks imported from this calendar.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Remote color code; import keeps only events with this color.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_id: Option<String>,
}

/// Per-group calendar settings. One row per group, upserted wholesale
/// on every settings write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    pub group_id: String,
    /// First calendar slot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calendar_one: Option<CalendarSlot>,
    /// Second calendar slot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calendar_two: Option<CalendarSlot>,
    /// First month of the sync window, as `YYYY-MM`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_since: Option<String>,
    /// IANA timezone name for display purposes.
    pub timezone: String,
    /// When sync last completed for this group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl CalendarConfig {
    /// New config for a group with no calendars wired yet.
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            calendar_one: None,
            calendar_two: None,
            sync_since: None,
            timezone: "Asia/Bangkok".to_string(),
            last_synced_at: None,
            updated_at: Utc::now(),
        }
    }

    /// Configured slots, in order.
    pub fn slots(&self) -> impl Iterator<Item = &CalendarSlot> {
        self.calendar_one.iter().chain(self.calendar_two.iter())
    }
}

/// A cached remote calendar event, keyed by (group, calendar, event id).
/// The full raw payload is retained for later import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedEvent {
    pub group_id: String,
    pub calendar_id: String,
    pub event_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    pub payload: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_iterates_configured_calendars_in_order() {
        let mut config = CalendarConfig::new("g1");
        assert_eq!(config.slots().count(), 0);

        config.calendar_two = Some(CalendarSlot {
            calendar_id: "cal-b".into(),
            tag: None,
            color_id: None,
        });
        config.calendar_one = Some(CalendarSlot {
            calendar_id: "cal-a".into(),
            tag: Some("work".into()),
            color_id: Some("11".into()),
        });

        let ids: Vec<&str> = config.slots().map(|s| s.calendar_id.as_str()).collect();
        assert_eq!(ids, vec!["cal-a", "cal-b"]);
    }

    #[test]
    fn config_serde_roundtrip() {
        let mut config = CalendarConfig::new("g1");
        config.sync_since = Some("2025-06".into());
        let json = serde_json::to_string(&config).unwrap();
        let parsed: CalendarConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.group_id, "g1");
        assert_eq!(parsed.sync_since.as_deref(), Some("2025-06"));
        assert_eq!(parsed.timezone, "Asia/Bangkok");
    }
}
