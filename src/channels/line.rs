//! LINE Messaging API channel — webhook in, reply API out.
//!
//! The webhook verifies the `x-line-signature` header (base64
//! HMAC-SHA256 of the raw body with the channel secret) before touching
//! the payload. One failing event never aborts the batch: the handler
//! sends a fallback reply and moves on to the next event.

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use secrecy::ExposeSecret;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, error, info, warn};

use crate::api::AppState;
use crate::channels::commands::{self, Command, HELP_TEXT};
use crate::config::LineConfig;
use crate::error::ChannelError;
use crate::store::Database;
use crate::tasks::model::{NewTask, TaskFilter, TaskPatch, TaskStatus};

/// Maximum text length for a single LINE message.
const LINE_MAX_TEXT_LENGTH: usize = 5000;

/// Reply sent when handling a recognized command blows up.
const FALLBACK_REPLY: &str = "Something went wrong handling that. Try `help` for usage.";

/// LINE channel — verifies webhooks and sends replies via the Bot API.
pub struct LineChannel {
    config: LineConfig,
    api_base: String,
    client: reqwest::Client,
}

impl LineChannel {
    pub fn new(config: LineConfig) -> Self {
        Self {
            config,
            api_base: "https://api.line.me".to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Override the API base (tests, regional endpoints).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{path}", self.api_base)
    }

    /// Verify the webhook signature over the raw request body.
    pub fn verify_signature(&self, body: &[u8], signature_b64: &str) -> bool {
        verify_signature(self.config.channel_secret.expose_secret(), body, signature_b64)
    }

    /// Send a text reply for a webhook event.
    pub async fn reply(&self, reply_token: &str, text: &str) -> Result<(), ChannelError> {
        let text = truncate_chars(text, LINE_MAX_TEXT_LENGTH);
        let body = serde_json::json!({
            "replyToken": reply_token,
            "messages": [{ "type": "text", "text": text }],
        });

        let resp = self
            .client
            .post(self.api_url("/v2/bot/message/reply"))
            .bearer_auth(self.config.channel_token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "line".into(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "line".into(),
                reason: format!("reply failed ({status}): {err}"),
            });
        }

        Ok(())
    }
}

/// Verify a base64 HMAC-SHA256 signature against the raw body.
pub fn verify_signature(secret: &str, body: &[u8], signature_b64: &str) -> bool {
    let Ok(expected) = BASE64.decode(signature_b64) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Compute the signature a sender would attach for `body` (test helper).
pub fn sign_body(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(body);
    BASE64.encode(mac.finalize().into_bytes())
}

/// Truncate to at most `max` characters on a char boundary.
fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    text.chars().take(max).collect()
}

// ── Webhook payload ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub events: Vec<WebhookEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub reply_token: Option<String>,
    #[serde(default)]
    pub source: Option<EventSource>,
    #[serde(default)]
    pub message: Option<EventMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSource {
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl EventSource {
    /// The task-list scope this event belongs to: the group or room id,
    /// falling back to the user id for 1:1 chats.
    pub fn scope_id(&self) -> Option<&str> {
        self.group_id
            .as_deref()
            .or(self.room_id.as_deref())
            .or(self.user_id.as_deref())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

// ── Webhook route ───────────────────────────────────────────────────

/// Build the webhook router.
pub fn webhook_routes(state: AppState) -> Router {
    Router::new()
        .route("/webhook/line", post(handle_webhook))
        .with_state(state)
}

async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let Some(line) = state.line.clone() else {
        return (StatusCode::NOT_FOUND, "webhook disabled");
    };

    let signature = headers
        .get("x-line-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !line.verify_signature(&body, signature) {
        warn!("Webhook signature verification failed");
        return (StatusCode::UNAUTHORIZED, "invalid signature");
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "Webhook payload did not parse");
            return (StatusCode::BAD_REQUEST, "invalid payload");
        }
    };

    for event in &payload.events {
        handle_event(&state, &line, event).await;
    }

    (StatusCode::OK, "ok")
}

/// Handle one webhook event. Failures are swallowed here so the rest of
/// the batch still runs.
async fn handle_event(state: &AppState, line: &LineChannel, event: &WebhookEvent) {
    if event.event_type != "message" {
        return;
    }
    let Some(reply_token) = event.reply_token.as_deref() else {
        return;
    };
    let Some(text) = event
        .message
        .as_ref()
        .filter(|m| m.message_type == "text")
        .and_then(|m| m.text.as_deref())
    else {
        return;
    };
    let Some(group_id) = event.source.as_ref().and_then(|s| s.scope_id()) else {
        return;
    };

    // Ordinary chatter: stay quiet.
    let Some(command) = commands::parse(text) else {
        debug!(group_id, "Ignoring non-command message");
        return;
    };

    match run_command(state, group_id, command).await {
        Ok(reply) => {
            if let Err(e) = line.reply(reply_token, &reply).await {
                error!(group_id, error = %e, "Failed to send reply");
            }
        }
        Err(e) => {
            error!(group_id, error = %e, "Command handling failed");
            if let Err(e) = line.reply(reply_token, FALLBACK_REPLY).await {
                error!(group_id, error = %e, "Failed to send fallback reply");
            }
        }
    }
}

/// Execute a parsed command against the task store and build the reply.
async fn run_command(
    state: &AppState,
    group_id: &str,
    command: Command,
) -> Result<String, ChannelError> {
    let db: &dyn Database = state.db.as_ref();

    match command {
        Command::Help => Ok(HELP_TEXT.to_string()),

        Command::Add {
            title,
            description,
            due,
        } => {
            if title.is_empty() {
                return Ok(format!("A task needs a title.\n\n{HELP_TEXT}"));
            }

            let mut new = NewTask::new(group_id, title);
            new.description = description;
            new.due_at = due.and_then(|d| commands::local_midnight(d, state.tz));

            let task = crate::tasks::allocate_task(db, new).await?;
            info!(group_id, code = %task.code, "Task added via chat");

            let mut reply = format!("Added {}: {}", task.code, task.title);
            if let Some(due) = task.due_at {
                reply.push_str(&format!(
                    " (due {})",
                    due.with_timezone(&state.tz).format("%Y-%m-%d")
                ));
            }
            Ok(reply)
        }

        Command::List { today_only } => {
            let mut filter = TaskFilter::open();
            if today_only {
                let (start, end) = commands::today_range(chrono::Utc::now(), state.tz);
                filter.due_from = Some(start);
                filter.due_until = Some(end);
            }
            let tasks = db.list_tasks(group_id, &filter).await?;

            if tasks.is_empty() {
                return Ok(if today_only {
                    "Nothing due today.".to_string()
                } else {
                    "No open tasks.".to_string()
                });
            }

            let lines: Vec<String> = tasks
                .iter()
                .map(|t| {
                    let mut line = format!("{} {}", t.code, t.title);
                    if let Some(due) = t.due_at {
                        line.push_str(&format!(
                            " (due {})",
                            due.with_timezone(&state.tz).format("%Y-%m-%d")
                        ));
                    }
                    line
                })
                .collect();
            Ok(lines.join("\n"))
        }

        Command::Done { code } => {
            let Some(task) = db.get_task_by_code(group_id, &code).await? else {
                return Ok(format!("No task with code {code}."));
            };
            let patch = TaskPatch {
                status: Some(TaskStatus::Done),
                progress: Some(100),
                ..Default::default()
            };
            db.update_task(task.id, &patch).await?;
            info!(group_id, code = %code, "Task done via chat");
            Ok(format!("Done: {} {}", task.code, task.title))
        }
    }
}
