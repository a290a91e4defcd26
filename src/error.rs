//! Error types for the conversation engine.

use std::time::Duration;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Unknown timezone identifier: {0}")]
    UnknownTimezone(String),
}

/// Inbound payload validation failures.
///
/// Raised before any state mutation; the caller gets a structured
/// rejection and nothing is written.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid phone number for {field}: {value}")]
    InvalidPhone { field: &'static str, value: String },
}

/// Record-store errors. Surfaced to the worker for retry; the engine
/// itself performs no retry logic.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// SMS provider transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Send to {to} failed: {reason}")]
    SendFailed { to: String, reason: String },

    #[error("Provider rejected message to {to}: status {status}")]
    Rejected { to: String, status: String },

    #[error("Provider request timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
