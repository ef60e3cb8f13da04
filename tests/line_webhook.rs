//! End-to-end webhook tests.
//!
//! A fixture Axum server stands in for the LINE reply endpoint and
//! captures outbound replies; the webhook server under test points its
//! API base at the fixture.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::routing::post;
use axum::{Json, Router};
use chrono::{FixedOffset, Utc};
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use taskbot::api::AppState;
use taskbot::channels::commands;
use taskbot::channels::line::{LineChannel, sign_body, webhook_routes};
use taskbot::config::LineConfig;
use taskbot::store::{Database, LibSqlBackend};
use taskbot::tasks::model::TaskFilter;

const SECRET: &str = "channel-secret";

fn bangkok() -> FixedOffset {
    FixedOffset::east_opt(7 * 3600).unwrap()
}

/// Fixture standing in for the LINE reply endpoint.
async fn start_reply_fixture() -> (String, Arc<Mutex<Vec<Value>>>) {
    let captured: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));

    let app = Router::new().route(
        "/v2/bot/message/reply",
        post({
            let captured = Arc::clone(&captured);
            move |Json(body): Json<Value>| {
                let captured = Arc::clone(&captured);
                async move {
                    captured.lock().unwrap().push(body);
                    Json(json!({}))
                }
            }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://127.0.0.1:{port}"), captured)
}

/// Start the webhook server wired to the fixture; return
/// (webhook_url, db, captured replies).
async fn start_webhook_server() -> (String, Arc<dyn Database>, Arc<Mutex<Vec<Value>>>) {
    let (reply_base, captured) = start_reply_fixture().await;

    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let line_config = LineConfig {
        channel_secret: SecretString::from(SECRET),
        channel_token: SecretString::from("token"),
    };
    let line = Arc::new(LineChannel::new(line_config).with_api_base(reply_base));

    let state = AppState {
        db: Arc::clone(&db),
        admin_key: SecretString::from("unused"),
        tz: bangkok(),
        line: Some(line),
        calendar: None,
    };
    let app = webhook_routes(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    (
        format!("http://127.0.0.1:{port}/webhook/line"),
        db,
        captured,
    )
}

fn message_event(group: &str, reply_token: &str, text: &str) -> Value {
    json!({
        "type": "message",
        "replyToken": reply_token,
        "source": { "type": "group", "groupId": group },
        "message": { "type": "text", "id": "m1", "text": text }
    })
}

async fn post_events(url: &str, events: Vec<Value>) -> reqwest::Response {
    let body = serde_json::to_vec(&json!({ "events": events })).unwrap();
    let signature = sign_body(SECRET, &body);
    reqwest::Client::new()
        .post(url)
        .header("content-type", "application/json")
        .header("x-line-signature", signature)
        .body(body)
        .send()
        .await
        .unwrap()
}

fn reply_texts(captured: &Arc<Mutex<Vec<Value>>>) -> Vec<String> {
    captured
        .lock()
        .unwrap()
        .iter()
        .filter_map(|r| r["messages"][0]["text"].as_str().map(String::from))
        .collect()
}

#[tokio::test]
async fn rejects_bad_signature() {
    let (url, _db, captured) = start_webhook_server().await;

    let body = serde_json::to_vec(&json!({ "events": [] })).unwrap();
    let resp = reqwest::Client::new()
        .post(&url)
        .header("content-type", "application/json")
        .header("x-line-signature", sign_body("wrong-secret", &body))
        .body(body)
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 401);
    assert!(captured.lock().unwrap().is_empty());
}

#[tokio::test]
async fn add_command_creates_task_with_bangkok_due() {
    let (url, db, captured) = start_webhook_server().await;

    let resp = post_events(
        &url,
        vec![message_event(
            "G-1",
            "rt-1",
            "add Ship release | desc=tag and announce | due=2025-09-01",
        )],
    )
    .await;
    assert_eq!(resp.status(), 200);

    let tasks = db.list_tasks("G-1", &TaskFilter::default()).await.unwrap();
    assert_eq!(tasks.len(), 1);
    let task = &tasks[0];
    assert_eq!(task.title, "Ship release");
    assert_eq!(task.description.as_deref(), Some("tag and announce"));
    assert_eq!(
        task.due_at.unwrap().to_rfc3339(),
        "2025-08-31T17:00:00+00:00"
    );

    let replies = reply_texts(&captured);
    assert_eq!(replies.len(), 1);
    assert!(replies[0].starts_with(&format!("Added {}", task.code)));
    assert!(replies[0].contains("due 2025-09-01"));
}

#[tokio::test]
async fn done_command_completes_task_by_code() {
    let (url, db, captured) = start_webhook_server().await;

    post_events(&url, vec![message_event("G-1", "rt-1", "add Water plants")]).await;
    let tasks = db.list_tasks("G-1", &TaskFilter::default()).await.unwrap();
    let task = &tasks[0];

    let resp = post_events(
        &url,
        vec![message_event("G-1", "rt-2", &format!("done {}", task.code))],
    )
    .await;
    assert_eq!(resp.status(), 200);

    let updated = db.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(updated.status.as_str(), "done");
    assert_eq!(updated.progress, 100);

    let replies = reply_texts(&captured);
    assert!(replies[1].starts_with("Done:"));
}

#[tokio::test]
async fn unknown_code_gets_not_found_reply_and_batch_continues() {
    let (url, db, captured) = start_webhook_server().await;

    let resp = post_events(
        &url,
        vec![
            message_event("G-1", "rt-1", "done 9999"),
            message_event("G-1", "rt-2", "add Still works"),
        ],
    )
    .await;
    assert_eq!(resp.status(), 200);

    // The failed lookup did not stop the second event.
    let tasks = db.list_tasks("G-1", &TaskFilter::default()).await.unwrap();
    assert_eq!(tasks.len(), 1);

    let replies = reply_texts(&captured);
    assert_eq!(replies.len(), 2);
    assert!(replies[0].contains("No task with code 9999"));
    assert!(replies[1].starts_with("Added"));
}

#[tokio::test]
async fn list_today_only_shows_todays_tasks() {
    let (url, _db, captured) = start_webhook_server().await;

    let today = Utc::now().with_timezone(&bangkok()).date_naive();
    let today_str = today.format("%Y-%m-%d").to_string();
    let later = today + chrono::Duration::days(10);

    post_events(
        &url,
        vec![
            message_event("G-1", "rt-1", &format!("add Due today | due={today_str}")),
            message_event(
                "G-1",
                "rt-2",
                &format!("add Due later | due={}", later.format("%Y-%m-%d")),
            ),
            message_event("G-1", "rt-3", "list today"),
        ],
    )
    .await;

    let replies = reply_texts(&captured);
    assert_eq!(replies.len(), 3);
    assert!(replies[2].contains("Due today"));
    assert!(!replies[2].contains("Due later"));
}

#[tokio::test]
async fn add_without_title_replies_with_usage() {
    let (url, db, captured) = start_webhook_server().await;

    let resp = post_events(
        &url,
        vec![message_event("G-1", "rt-1", "add | desc=no title here")],
    )
    .await;
    assert_eq!(resp.status(), 200);

    // Nothing was persisted.
    let tasks = db.list_tasks("G-1", &TaskFilter::default()).await.unwrap();
    assert!(tasks.is_empty());

    let replies = reply_texts(&captured);
    assert_eq!(replies.len(), 1);
    assert!(replies[0].contains("needs a title"));
    assert!(replies[0].contains("Commands:"));
}

#[tokio::test]
async fn chatter_and_non_message_events_are_ignored() {
    let (url, db, captured) = start_webhook_server().await;

    let resp = post_events(
        &url,
        vec![
            message_event("G-1", "rt-1", "good morning everyone"),
            json!({ "type": "join", "replyToken": "rt-2",
                    "source": { "type": "group", "groupId": "G-1" } }),
        ],
    )
    .await;
    assert_eq!(resp.status(), 200);

    assert!(captured.lock().unwrap().is_empty());
    let tasks = db.list_tasks("G-1", &TaskFilter::default()).await.unwrap();
    assert!(tasks.is_empty());
}

#[tokio::test]
async fn help_replies_with_usage() {
    let (url, _db, captured) = start_webhook_server().await;

    post_events(&url, vec![message_event("G-1", "rt-1", "help")]).await;

    let replies = reply_texts(&captured);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0], commands::HELP_TEXT);
}
