//! Error types for taskbot.

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Calendar error: {0}")]
    Calendar(#[from] CalendarError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Task-domain errors.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The 4-digit code space for a group is (effectively) full.
    #[error("No free task code in group {group_id} after {attempts} attempts")]
    CodesExhausted { group_id: String, attempts: u32 },

    #[error("Invalid progress value {value} (expected 0–100)")]
    InvalidProgress { value: i64 },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Messaging-channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Webhook signature verification failed")]
    InvalidSignature,

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("Failed to send reply on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),
}

/// Calendar-service errors.
#[derive(Debug, thiserror::Error)]
pub enum CalendarError {
    #[error("Calendar authentication failed: {0}")]
    Auth(String),

    #[error("Calendar request failed: {0}")]
    Request(String),

    #[error("Calendar not configured: {0}")]
    NotConfigured(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
