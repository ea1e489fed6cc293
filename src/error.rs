//! Error types for the schema repository

use std::time::Duration;

use thiserror::Error;

/// Result type for repository operations
pub type Result<T> = std::result::Result<T, RepoError>;

/// A candidate schema was rejected by a validator or validation strategy.
///
/// The subject is left untouched when this is raised.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Schema repository errors
#[derive(Error, Debug)]
pub enum RepoError {
    #[error("Schema validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid subject name: '{0}'")]
    InvalidSubjectName(String),

    #[error("Schema text must not be empty")]
    EmptySchema,

    #[error("Keys starting with '{prefix}' are reserved, failed to set: {key}")]
    ReservedKey { prefix: String, key: String },

    #[error("Unknown validator: {0}")]
    UnknownValidator(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Repository is closed")]
    Closed,

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Timed out after {0:?} waiting for the subject lock")]
    LockTimeout(Duration),

    #[error("Gave up writing to subject {subject} after {attempts} attempts; other writers kept moving its latest schema")]
    WriteContention { subject: String, attempts: usize },

    #[error("Corrupt repository state at {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("Id collision in subject {subject}: id {id} already holds a different schema")]
    IdCollision { subject: String, id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    ConfigLoad(#[from] config_crate::ConfigError),
}

impl RepoError {
    /// Whether the caller can reasonably retry or report the failure and carry on.
    ///
    /// Everything else means the repository (or the request) is not usable as is.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RepoError::Validation(_)
                | RepoError::LockTimeout(_)
                | RepoError::WriteContention { .. }
                | RepoError::EmptySchema
        )
    }

    pub(crate) fn unavailable(what: impl std::fmt::Display) -> Self {
        RepoError::Unavailable(what.to_string())
    }

    pub(crate) fn corrupt(path: impl Into<String>, reason: impl Into<String>) -> Self {
        RepoError::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
