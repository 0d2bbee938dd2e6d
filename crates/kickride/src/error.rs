//! Error types for kickride.
//!
//! This module defines the error taxonomy shared by every engine component:
//! validation failures rejected before any mutation, missing entities,
//! state conflicts, best-effort ingestion failures, and storage or
//! configuration problems.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for kickride operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Request Errors ===
    /// A required field was missing or a value was out of range.
    #[error("validation failed: {message}")]
    Validation {
        /// Description of the invalid input.
        message: String,
    },

    /// The referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of entity (ride, kickboard, rider, kpi).
        entity: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// The operation is not allowed in the entity's current state.
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflicting state.
        message: String,
    },

    // === Ingestion Errors ===
    /// A risk event referenced a KPI that is not in the catalog.
    #[error("unresolved KPI reference '{reference}'")]
    UnresolvedKpi {
        /// The reference as supplied by the caller.
        reference: String,
    },

    /// A best-effort side task could not be queued or completed.
    #[error("side task '{task}' failed: {message}")]
    SideTask {
        /// Name of the side task.
        task: &'static str,
        /// Description of what went wrong.
        message: String,
    },

    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug or corrupt row).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for kickride operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a new not-found error.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Create a new conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a new side task error.
    #[must_use]
    pub fn side_task(task: &'static str, message: impl Into<String>) -> Self {
        Self::SideTask {
            task,
            message: message.into(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error is a validation failure.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Check if this error reports a missing entity.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this error reports a state conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
