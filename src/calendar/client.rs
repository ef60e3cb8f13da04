//! Google Calendar v3 client — service-account auth over plain REST.
//!
//! Auth flow: sign an RS256 JWT with the service-account key, exchange
//! it at the token endpoint, cache the access token until shortly
//! before expiry.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::GoogleConfig;
use crate::error::CalendarError;

const OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const CALENDAR_API: &str = "https://www.googleapis.com/calendar/v3";
const CALENDAR_SCOPE: &str = "https://www.googleapis.com/auth/calendar";

/// How long before expiry a cached token is considered stale.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// A remote event's start or end: all-day events carry `date`, timed
/// events carry `dateTime`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTime {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

/// The slice of a remote event this service cares about.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEvent {
    pub id: String,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub color_id: Option<String>,
    #[serde(default)]
    pub html_link: Option<String>,
    #[serde(default)]
    pub start: Option<EventTime>,
    #[serde(default)]
    pub end: Option<EventTime>,
    #[serde(default)]
    pub updated: Option<String>,
}

/// Input for creating a remote event.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventListPage {
    #[serde(default)]
    items: Vec<serde_json::Value>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Google Calendar client.
pub struct CalendarClient {
    config: GoogleConfig,
    client: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl CalendarClient {
    pub fn new(config: GoogleConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            token: Mutex::new(None),
        }
    }

    /// Get a valid access token, reusing the cached one when fresh.
    async fn access_token(&self) -> Result<String, CalendarError> {
        let mut guard = self.token.lock().await;
        if let Some(cached) = guard.as_ref() {
            let margin = chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);
            if cached.expires_at - margin > Utc::now() {
                return Ok(cached.access_token.clone());
            }
        }

        let now = Utc::now();
        let claims = Claims {
            iss: &self.config.client_email,
            scope: CALENDAR_SCOPE,
            aud: OAUTH_TOKEN_URL,
            iat: now.timestamp(),
            exp: now.timestamp() + 3600,
        };
        let key = EncodingKey::from_rsa_pem(self.config.private_key.expose_secret().as_bytes())
            .map_err(|e| CalendarError::Auth(format!("invalid service-account key: {e}")))?;
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| CalendarError::Auth(format!("JWT signing failed: {e}")))?;

        let resp = self
            .client
            .post(OAUTH_TOKEN_URL)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| CalendarError::Auth(format!("token request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            return Err(CalendarError::Auth(format!(
                "token exchange failed ({status}): {err}"
            )));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| CalendarError::Auth(format!("token response did not parse: {e}")))?;

        let cached = CachedToken {
            access_token: token.access_token.clone(),
            expires_at: now + chrono::Duration::seconds(token.expires_in),
        };
        *guard = Some(cached);
        debug!("Google access token refreshed");
        Ok(token.access_token)
    }

    /// List events in `[time_min, time_max)`, following pagination.
    /// Returns the raw payloads; callers parse what they need.
    pub async fn list_events(
        &self,
        calendar_id: &str,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> Result<Vec<serde_json::Value>, CalendarError> {
        let token = self.access_token().await?;
        let url = format!(
            "{CALENDAR_API}/calendars/{}/events",
            urlencode(calendar_id)
        );

        let mut events = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self
                .client
                .get(&url)
                .bearer_auth(&token)
                .query(&[
                    ("timeMin", time_min.to_rfc3339().as_str()),
                    ("timeMax", time_max.to_rfc3339().as_str()),
                    ("singleEvents", "true"),
                    ("maxResults", "2500"),
                ]);
            if let Some(ref t) = page_token {
                request = request.query(&[("pageToken", t.as_str())]);
            }

            let resp = request
                .send()
                .await
                .map_err(|e| CalendarError::Request(format!("events.list failed: {e}")))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let err = resp.text().await.unwrap_or_default();
                return Err(CalendarError::Request(format!(
                    "events.list failed ({status}): {err}"
                )));
            }

            let page: EventListPage = resp
                .json()
                .await
                .map_err(|e| CalendarError::Request(format!("events.list did not parse: {e}")))?;
            events.extend(page.items);

            match page.next_page_token {
                Some(t) => page_token = Some(t),
                None => break,
            }
        }

        debug!(calendar_id, count = events.len(), "Listed remote events");
        Ok(events)
    }

    /// Create an event in a remote calendar.
    pub async fn insert_event(
        &self,
        calendar_id: &str,
        event: &NewEvent,
    ) -> Result<RemoteEvent, CalendarError> {
        let token = self.access_token().await?;
        let url = format!(
            "{CALENDAR_API}/calendars/{}/events",
            urlencode(calendar_id)
        );

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .json(event)
            .send()
            .await
            .map_err(|e| CalendarError::Request(format!("events.insert failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            return Err(CalendarError::Request(format!(
                "events.insert failed ({status}): {err}"
            )));
        }

        resp.json()
            .await
            .map_err(|e| CalendarError::Request(format!("events.insert did not parse: {e}")))
    }
}

/// Percent-encode a calendar id for use as a path segment.
fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_event_parses_google_shape() {
        let json = serde_json::json!({
            "id": "evt_1",
            "etag": "\"33\"",
            "status": "confirmed",
            "summary": "Standup",
            "colorId": "11",
            "htmlLink": "https://calendar.google.com/event?eid=abc",
            "start": { "dateTime": "2025-09-01T10:00:00+07:00" },
            "end": { "dateTime": "2025-09-01T10:15:00+07:00" },
            "updated": "2025-08-20T01:02:03.000Z"
        });
        let event: RemoteEvent = serde_json::from_value(json).unwrap();
        assert_eq!(event.id, "evt_1");
        assert_eq!(event.color_id.as_deref(), Some("11"));
        assert_eq!(
            event.start.unwrap().date_time.as_deref(),
            Some("2025-09-01T10:00:00+07:00")
        );
    }

    #[test]
    fn all_day_event_has_date_only() {
        let json = serde_json::json!({
            "id": "evt_2",
            "summary": "Holiday",
            "start": { "date": "2025-09-01" },
            "end": { "date": "2025-09-02" }
        });
        let event: RemoteEvent = serde_json::from_value(json).unwrap();
        let start = event.start.unwrap();
        assert_eq!(start.date.as_deref(), Some("2025-09-01"));
        assert!(start.date_time.is_none());
    }

    #[test]
    fn new_event_serializes_camel_case() {
        let event = NewEvent {
            summary: "Review".into(),
            description: None,
            start: EventTime {
                date_time: Some("2025-09-01T10:00:00+07:00".into()),
                ..Default::default()
            },
            end: EventTime {
                date_time: Some("2025-09-01T11:00:00+07:00".into()),
                ..Default::default()
            },
            color_id: Some("5".into()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["colorId"], "5");
        assert_eq!(json["start"]["dateTime"], "2025-09-01T10:00:00+07:00");
        assert!(json.get("description").is_none());
    }

    #[test]
    fn urlencode_escapes_calendar_ids() {
        assert_eq!(
            urlencode("team@group.calendar.google.com"),
            "team%40group.calendar.google.com"
        );
        assert_eq!(urlencode("simple-id_1.x"), "simple-id_1.x");
    }
}
