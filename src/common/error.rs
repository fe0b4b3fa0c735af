//! Error types for the application.

use thiserror::Error;

/// Top-level application error.
///
/// Anything that surfaces as an `AppError` during startup is fatal: the
/// process does not proceed with bridging.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Message association error: {0}")]
    Association(#[from] AssociationError),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {message}")]
    IoError { path: String, message: String },

    #[error("Failed to parse config: {message}")]
    ParseError { message: String },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },

    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// Failure of a single outbound delivery (`say`, `edit`, `delete`).
///
/// Delivery errors are local to one destination: the bridge logs them and
/// carries on with the remaining destinations.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("{client} is not connected")]
    NotConnected { client: String },

    #[error("Invalid target '{target}' for {client}")]
    InvalidTarget { client: String, target: String },

    #[error("Invalid message id '{message_id}' for {client}")]
    InvalidMessageId { client: String, message_id: String },

    #[error("{client} does not support {operation}")]
    Unsupported {
        client: String,
        operation: &'static str,
    },

    #[error("Failed to send message via {client}: {message}")]
    SendFailed { client: String, message: String },

    #[error("Discord error: {0}")]
    Discord(#[from] serenity::Error),

    #[error("Telegram error: {0}")]
    Telegram(#[from] teloxide::RequestError),
}

/// Message association storage errors.
#[derive(Debug, Error)]
pub enum AssociationError {
    #[error("Message association is disabled")]
    Disabled,

    #[error("Message association store has not been started")]
    NotStarted,

    #[error("Unknown message association type '{name}'")]
    UnknownBackend { name: String },

    #[error("Association store '{backend}' requires a '{section}' section in configuration")]
    MissingSettings {
        backend: &'static str,
        section: &'static str,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for delivery operations.
pub type DeliveryResult<T> = std::result::Result<T, DeliveryError>;

/// Result type alias for association store operations.
pub type AssociationResult<T> = std::result::Result<T, AssociationError>;
