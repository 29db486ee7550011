//! Error types for sqlbox.
//!
//! Defines the main error enum used throughout the server. Display strings of the
//! request-facing variants are exactly what callers see in the `error` field.

use std::time::Duration;

use thiserror::Error;

use crate::safety::RejectReason;

/// Main error type for sqlbox operations.
#[derive(Error, Debug)]
pub enum SqlboxError {
    /// Database connection errors (host unreachable, auth failed, pool exhausted, etc.)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Errors returned by the database for a single call outside statement execution.
    #[error("Query error: {0}")]
    Query(String),

    /// The submitted request is malformed (empty query, too long, bad JSON).
    #[error("{0}")]
    InvalidRequest(String),

    /// The query was rejected by the security validator.
    #[error("Security validation failed: {0}")]
    Rejected(RejectReason),

    /// The per-request sandbox database could not be created.
    #[error("Failed to create sandbox: {0}")]
    SandboxCreation(String),

    /// A statement failed; `position` is 1-based within the submission.
    #[error("Query execution failed: error in statement {position}: {message}")]
    Statement { position: usize, message: String },

    /// Execution failed outside a specific statement (session setup, empty split).
    #[error("Query execution failed: {0}")]
    Execution(String),

    /// The request deadline elapsed before execution finished.
    #[error("Query execution timeout exceeded ({0:?})")]
    Timeout(Duration),

    /// Dropping a sandbox database failed. Never surfaced to callers.
    #[error("Failed to cleanup sandbox {name}: {message}")]
    Cleanup { name: String, message: String },

    /// Configuration errors (invalid config file, bad values, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal application errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SqlboxError {
    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a query error with the given message.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Creates an invalid-request error with the given message.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Creates an execution error with the given message.
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Creates a statement error for the statement at `position` (1-based).
    pub fn statement(position: usize, msg: impl Into<String>) -> Self {
        Self::Statement {
            position,
            message: msg.into(),
        }
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "Connection Error",
            Self::Query(_) => "Query Error",
            Self::InvalidRequest(_) => "Invalid Request",
            Self::Rejected(_) => "Validation Rejected",
            Self::SandboxCreation(_) => "Sandbox Creation Failed",
            Self::Statement { .. } | Self::Execution(_) => "Execution Failed",
            Self::Timeout(_) => "Execution Timeout",
            Self::Cleanup { .. } => "Cleanup Failed",
            Self::Config(_) => "Configuration Error",
            Self::Internal(_) => "Internal Error",
        }
    }
}

/// Result type alias using SqlboxError.
pub type Result<T> = std::result::Result<T, SqlboxError>;
