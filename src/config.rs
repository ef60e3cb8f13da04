//! Configuration built from environment variables.
//!
//! Optional integrations (LINE, Google Calendar) follow the same
//! convention: `from_env()` returns `None` when the integration's
//! anchor variable is absent, and the service runs without it.

use chrono::FixedOffset;
use secrecy::SecretString;

use crate::error::ConfigError;

/// Core service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Shared secret gating the admin API.
    pub admin_key: SecretString,
    /// Path to the libSQL database file.
    pub db_path: String,
    /// HTTP listen port.
    pub port: u16,
    /// Fixed UTC offset used for bot-facing date interpretation.
    /// Defaults to +07:00 (Bangkok); the bot's group chats live there.
    pub tz_offset: FixedOffset,
}

impl AppConfig {
    /// Build config from environment variables. `ADMIN_KEY` is required.
    pub fn from_env() -> Result<Self, ConfigError> {
        let admin_key = std::env::var("ADMIN_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("ADMIN_KEY".into()))?;

        let db_path =
            std::env::var("TASKBOT_DB_PATH").unwrap_or_else(|_| "./data/taskbot.db".to_string());

        let port: u16 = std::env::var("TASKBOT_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8787);

        let tz_hours: i32 = std::env::var("TASKBOT_TZ_OFFSET_HOURS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(7);
        let tz_offset = FixedOffset::east_opt(tz_hours * 3600).ok_or_else(|| {
            ConfigError::InvalidValue {
                key: "TASKBOT_TZ_OFFSET_HOURS".into(),
                message: format!("{tz_hours} is not a valid UTC offset"),
            }
        })?;

        Ok(Self {
            admin_key: SecretString::from(admin_key),
            db_path,
            port,
            tz_offset,
        })
    }
}

/// LINE Messaging API credentials.
#[derive(Debug, Clone)]
pub struct LineConfig {
    /// Channel secret, used to verify webhook signatures.
    pub channel_secret: SecretString,
    /// Channel access token, used to call the reply endpoint.
    pub channel_token: SecretString,
}

impl LineConfig {
    /// Build config from environment variables.
    /// Returns `None` if `LINE_CHANNEL_SECRET` is not set (webhook disabled).
    pub fn from_env() -> Option<Self> {
        let channel_secret = std::env::var("LINE_CHANNEL_SECRET").ok()?;
        let channel_token = std::env::var("LINE_CHANNEL_ACCESS_TOKEN").unwrap_or_default();

        Some(Self {
            channel_secret: SecretString::from(channel_secret),
            channel_token: SecretString::from(channel_token),
        })
    }
}

/// Google service-account credentials for the Calendar API.
#[derive(Debug, Clone)]
pub struct GoogleConfig {
    /// Service account email (the JWT issuer).
    pub client_email: String,
    /// RSA private key in PEM form. `\n` escapes are unescaped so the
    /// key can be passed through a single-line env var.
    pub private_key: SecretString,
}

impl GoogleConfig {
    /// Build config from environment variables.
    /// Returns `None` if `GOOGLE_CLIENT_EMAIL` is not set (calendar disabled).
    pub fn from_env() -> Option<Self> {
        let client_email = std::env::var("GOOGLE_CLIENT_EMAIL").ok()?;
        let private_key = std::env::var("GOOGLE_PRIVATE_KEY")
            .unwrap_or_default()
            .replace("\\n", "\n");

        Some(Self {
            client_email,
            private_key: SecretString::from(private_key),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_config_absent_without_secret() {
        // SAFETY: This test runs in isolation; no other thread reads LINE_CHANNEL_SECRET concurrently.
        unsafe { std::env::remove_var("LINE_CHANNEL_SECRET") };
        assert!(LineConfig::from_env().is_none());
    }

    #[test]
    fn google_private_key_unescapes_newlines() {
        // SAFETY: This test runs in isolation; no other thread reads these vars concurrently.
        unsafe {
            std::env::set_var("GOOGLE_CLIENT_EMAIL", "svc@example.iam.gserviceaccount.com");
            std::env::set_var("GOOGLE_PRIVATE_KEY", "-----BEGIN\\nKEY-----");
        }
        let config = GoogleConfig::from_env().unwrap();
        use secrecy::ExposeSecret;
        assert_eq!(config.private_key.expose_secret(), "-----BEGIN\nKEY-----");
        unsafe {
            std::env::remove_var("GOOGLE_CLIENT_EMAIL");
            std::env::remove_var("GOOGLE_PRIVATE_KEY");
        }
    }
}
