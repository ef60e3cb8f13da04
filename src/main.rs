use std::sync::Arc;

use taskbot::api::{AppState, admin_routes};
use taskbot::calendar::client::CalendarClient;
use taskbot::channels::line::{LineChannel, webhook_routes};
use taskbot::config::{AppConfig, GoogleConfig, LineConfig};
use taskbot::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export ADMIN_KEY=...");
        std::process::exit(1);
    });

    eprintln!("📋 taskbot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Admin API: http://0.0.0.0:{}/api/tasks", config.port);
    eprintln!("   Webhook:   http://0.0.0.0:{}/webhook/line", config.port);

    // ── Database ─────────────────────────────────────────────────────
    let db_path_ref = std::path::Path::new(&config.db_path);
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(db_path_ref)
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {}: {}", config.db_path, e);
                std::process::exit(1);
            }),
    );
    eprintln!("   Database: {}", config.db_path);

    // ── Optional integrations ────────────────────────────────────────
    let line = LineConfig::from_env().map(|c| Arc::new(LineChannel::new(c)));
    eprintln!(
        "   LINE webhook: {}",
        if line.is_some() { "enabled" } else { "disabled" }
    );

    let calendar = GoogleConfig::from_env().map(|c| Arc::new(CalendarClient::new(c)));
    eprintln!(
        "   Google Calendar: {}",
        if calendar.is_some() { "enabled" } else { "disabled" }
    );

    let state = AppState {
        db,
        admin_key: config.admin_key.clone(),
        tz: config.tz_offset,
        line,
        calendar,
    };

    let app = admin_routes(state.clone()).merge(webhook_routes(state));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!(port = config.port, "Server started");
    axum::serve(listener, app).await?;

    Ok(())
}
