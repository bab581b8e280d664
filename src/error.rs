//! Error types for the weekly planner.

use chrono::NaiveDate;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("No authenticated account; sign in before changing tasks")]
    Unauthenticated,
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Store-related errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Instance of template {template_id} already exists for {date}")]
    Duplicate {
        template_id: String,
        date: NaiveDate,
    },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Input rejected before any store write.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Title must not be empty")]
    EmptyTitle,

    #[error("A date is required")]
    MissingDate,

    #[error("Date {date} is before today ({today})")]
    PastDate { date: NaiveDate, today: NaiveDate },

    #[error("Weekday must be between 0 (Sunday) and 6 (Saturday), got {0}")]
    InvalidWeekday(u8),
}

/// Materialization failures surfaced to the caller of a sync run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("Failed to load store state: {0}")]
    Load(#[source] DatabaseError),

    #[error("Failed to materialize {} template(s) for {date}: {reason}", template_ids.len())]
    Materialize {
        date: NaiveDate,
        template_ids: Vec<String>,
        reason: String,
    },

    #[error("Failed to propagate template {template_id} to today's task: {reason}")]
    Propagate { template_id: String, reason: String },

    #[error("Sync loop has shut down")]
    Closed,
}

/// Result type alias for the planner.
pub type Result<T> = std::result::Result<T, Error>;
