//! Error types for Forge Gate
//!
//! This module defines the error taxonomy shared by the gateway and the
//! client session, using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for Forge Gate operations
///
/// Variants are grouped by who can recover from them: the caller (bad input),
/// the user (re-authentication), or an operator (upstream dependency down).
#[derive(Error, Debug)]
pub enum ForgeError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Client-caused input error (maps to 400)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Missing, invalid or expired bearer token (maps to 401)
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Valid token but insufficient rights (maps to 403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Identity provider or store unreachable or misbehaving (maps to 5xx)
    #[error("Upstream dependency error: {0}")]
    Upstream(String),

    /// No lease is held; the caller must log in before calling the API
    #[error("Not authenticated: log in first")]
    NotAuthenticated,

    /// Token renewal failed and the lease was cleared
    #[error("Session ended: {0}. Please log in again")]
    SessionEnded(String),

    /// Interactive login failed
    #[error("Login failed: {0}")]
    Login(String),

    /// An initialization attempt was abandoned through its cancellation token
    #[error("Operation cancelled")]
    Cancelled,

    /// Persistent store errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Keyring/credential storage errors
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    /// SQLite errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Result type alias for Forge Gate operations
///
/// Uses `anyhow::Error` so call sites can attach context; match on
/// [`ForgeError`] with `downcast_ref` where the variant matters.
pub type Result<T> = anyhow::Result<T>;
