//! Error types for truckcheck.
//!
//! Storage and configuration failures are surfaced through this type. The
//! best-effort layers (location, rendering, delivery) use it internally and
//! collapse it into `Option`/`bool` at their public boundary.

use std::path::PathBuf;
use thiserror::Error;

use crate::checklist::SubmissionId;

/// The main error type for truckcheck operations.
#[derive(Error, Debug)]
pub enum Error {
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

    /// No submission exists with the given identifier.
    #[error("submission {0} not found")]
    SubmissionNotFound(SubmissionId),

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

    // === Delivery Errors ===
    /// Composing or sending an email failed.
    #[error("email delivery failed: {0}")]
    Email(String),

    /// The email can never be sent as is: a malformed address, a message that
    /// does not compose, or a permanent rejection from the relay.
    #[error("email rejected: {0}")]
    EmailRejected(String),

    /// An HTTP request could not be completed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote backend answered with a non-success status.
    #[error("remote backend rejected request ({status}): {message}")]
    Remote {
        /// HTTP status code returned.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    // === Rendering Errors ===
    /// The document renderer failed.
    #[error("document rendering failed: {0}")]
    Render(String),

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
    /// An operation timed out.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
    },

    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for truckcheck operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl From<genpdf::error::Error> for Error {
    fn from(err: genpdf::error::Error) -> Self {
        Self::Render(err.to_string())
    }
}

impl Error {
    /// Create a new email error.
    #[must_use]
    pub fn email(message: impl Into<String>) -> Self {
        Self::Email(message.into())
    }

    /// Create an error for an email that retrying will not fix.
    #[must_use]
    pub fn email_rejected(message: impl Into<String>) -> Self {
        Self::EmailRejected(message.into())
    }

    /// Create a new render error.
    #[must_use]
    pub fn render(message: impl Into<String>) -> Self {
        Self::Render(message.into())
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a timeout error for the named operation.
    #[must_use]
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Check if this error means the submission does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SubmissionNotFound(_))
    }

    /// Check if this error is worth retrying later.
    ///
    /// Network and timeout failures are transient; storage, configuration,
    /// rendering and rejected-email failures are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Email(_) | Self::Http(_) | Self::Remote { .. } | Self::Timeout { .. }
        )
    }
}
