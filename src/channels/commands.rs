//! Text command parsing for the chat bot.
//!
//! The bot understands a small fixed command set; anything else is
//! treated as ordinary chatter and ignored.

use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use regex::Regex;

static ADD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^add\s+(.+)$").unwrap());
static LIST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^list(?:\s+(today))?\s*$").unwrap());
static DONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^done\s+(\d{1,4})\s*$").unwrap());
static HELP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^help\s*$").unwrap());

/// A parsed bot command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Add {
        title: String,
        description: Option<String>,
        /// Due date, already anchored to local midnight.
        due: Option<NaiveDate>,
    },
    List {
        today_only: bool,
    },
    Done {
        code: String,
    },
}

/// Parse a chat message into a command. Returns `None` for ordinary
/// chatter so the bot stays quiet in group conversations.
pub fn parse(text: &str) -> Option<Command> {
    let text = text.trim();

    if HELP_RE.is_match(text) {
        return Some(Command::Help);
    }
    if let Some(caps) = LIST_RE.captures(text) {
        return Some(Command::List {
            today_only: caps.get(1).is_some(),
        });
    }
    if let Some(caps) = DONE_RE.captures(text) {
        // Codes are stored zero-padded; accept "42" for "0042".
        let code = format!("{:0>4}", &caps[1]);
        return Some(Command::Done { code });
    }
    if let Some(caps) = ADD_RE.captures(text) {
        return Some(parse_add(&caps[1]));
    }

    None
}

/// Parse the `add` body: `Title | desc=... | due=YYYY-MM-DD`.
/// Unknown segments are ignored rather than failing the whole command.
fn parse_add(body: &str) -> Command {
    let mut segments = body.split('|').map(str::trim);
    let title = segments.next().unwrap_or_default().to_string();

    let mut description = None;
    let mut due = None;
    for segment in segments {
        if let Some(value) = segment.strip_prefix("desc=") {
            let value = value.trim();
            if !value.is_empty() {
                description = Some(value.to_string());
            }
        } else if let Some(value) = segment.strip_prefix("due=") {
            due = NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok();
        }
    }

    Command::Add {
        title,
        description,
        due,
    }
}

/// Anchor a date to midnight at the given offset, in UTC.
///
/// `due=2025-09-01` from a Bangkok group means 2025-08-31T17:00:00Z no
/// matter where the server runs.
pub fn local_midnight(date: NaiveDate, tz: FixedOffset) -> Option<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0)?
        .and_local_timezone(tz)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// The `[start, end)` UTC range of "today" at the given offset.
pub fn today_range(now: DateTime<Utc>, tz: FixedOffset) -> (DateTime<Utc>, DateTime<Utc>) {
    let local_today = now.with_timezone(&tz).date_naive();
    let start = local_midnight(local_today, tz).unwrap_or(now);
    (start, start + chrono::Duration::days(1))
}

/// Usage text sent for `help` and as part of fallback replies.
pub const HELP_TEXT: &str = "Commands:\n\
    help — this message\n\
    add <title> | desc=<details> | due=YYYY-MM-DD — create a task\n\
    list — open tasks\n\
    list today — open tasks due today\n\
    done <code> — mark a task done";

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bangkok() -> FixedOffset {
        FixedOffset::east_opt(7 * 3600).unwrap()
    }

    #[test]
    fn parses_help() {
        assert_eq!(parse("help"), Some(Command::Help));
        assert_eq!(parse("  HELP "), Some(Command::Help));
    }

    #[test]
    fn parses_list_variants() {
        assert_eq!(parse("list"), Some(Command::List { today_only: false }));
        assert_eq!(parse("list today"), Some(Command::List { today_only: true }));
        assert_eq!(parse("List Today"), Some(Command::List { today_only: true }));
    }

    #[test]
    fn parses_done_and_pads_code() {
        assert_eq!(parse("done 0042"), Some(Command::Done { code: "0042".into() }));
        assert_eq!(parse("done 42"), Some(Command::Done { code: "0042".into() }));
        assert_eq!(parse("done abc"), None);
    }

    #[test]
    fn parses_bare_add() {
        let cmd = parse("add Buy snacks for Friday").unwrap();
        assert_eq!(
            cmd,
            Command::Add {
                title: "Buy snacks for Friday".into(),
                description: None,
                due: None,
            }
        );
    }

    #[test]
    fn parses_add_with_desc_and_due() {
        let cmd = parse("add Ship release | desc=tag and announce | due=2025-09-01").unwrap();
        match cmd {
            Command::Add {
                title,
                description,
                due,
            } => {
                assert_eq!(title, "Ship release");
                assert_eq!(description.as_deref(), Some("tag and announce"));
                assert_eq!(due, Some(NaiveDate::from_ymd_opt(2025, 9, 1).unwrap()));
            }
            other => panic!("expected Add, got {other:?}"),
        }
    }

    #[test]
    fn add_ignores_unknown_segments_and_bad_dates() {
        let cmd = parse("add T | who=me | due=someday").unwrap();
        match cmd {
            Command::Add {
                title,
                description,
                due,
            } => {
                assert_eq!(title, "T");
                assert!(description.is_none());
                assert!(due.is_none());
            }
            other => panic!("expected Add, got {other:?}"),
        }
    }

    #[test]
    fn chatter_is_ignored() {
        assert_eq!(parse("good morning everyone"), None);
        assert_eq!(parse("listen to this"), None);
        assert_eq!(parse("additional notes"), None);
    }

    #[test]
    fn bangkok_midnight_is_utc_minus_seven_hours() {
        let date = NaiveDate::from_ymd_opt(2025, 9, 1).unwrap();
        let due = local_midnight(date, bangkok()).unwrap();
        assert_eq!(due, Utc.with_ymd_and_hms(2025, 8, 31, 17, 0, 0).unwrap());
    }

    #[test]
    fn today_range_covers_local_day() {
        // 2025-09-01T01:00+07:00 is 2025-08-31T18:00Z — still "today"
        // in Bangkok even though UTC is a day behind.
        let now = Utc.with_ymd_and_hms(2025, 8, 31, 18, 0, 0).unwrap();
        let (start, end) = today_range(now, bangkok());
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 8, 31, 17, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2025, 9, 1, 17, 0, 0).unwrap());
    }
}
