//! Error types for flightdelay.
//!
//! This module defines the crate-wide error type used by storage, configuration
//! and the HTTP client. Request-level failures of the lookup pipeline live in
//! [`crate::lookup::LookupError`] and upstream failures in
//! [`crate::upstream::FetchError`].

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for flightdelay operations.
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

    /// An identity referenced by a write does not exist.
    #[error("identity not found: {id}")]
    IdentityNotFound {
        /// The identity that was looked up.
        id: String,
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

    // === Network Errors ===
    /// An HTTP request to the lookup service failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The lookup service answered with an error body.
    #[error("service error ({status}): {message}")]
    Service {
        /// HTTP status code returned by the service.
        status: u16,
        /// Machine-readable error code, when present.
        code: Option<String>,
        /// Human-readable message.
        message: String,
    },

    /// A client call needs an identity and none is set.
    #[error("no identity set for the lookup client; run `fldelay register --save` first")]
    NoClientIdentity,

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
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for flightdelay operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a configuration validation error.
    #[must_use]
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Check if this error is an answer from the service rather than a
    /// transport or local failure.
    #[must_use]
    pub fn is_service_error(&self) -> bool {
        matches!(self, Self::Service { .. })
    }

    /// The service's machine-readable error code, if this is a service error.
    #[must_use]
    pub fn service_code(&self) -> Option<&str> {
        match self {
            Self::Service { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_error() {
        let err = Error::internal("something went wrong");
        assert_eq!(err.to_string(), "internal error: something went wrong");
    }

    #[test]
    fn test_config_validation_error_display() {
        let err = Error::config_validation("daily_limit must be greater than 0");
        assert_eq!(
            err.to_string(),
            "invalid configuration: daily_limit must be greater than 0"
        );
    }

    #[test]
    fn test_identity_not_found_display() {
        let err = Error::IdentityNotFound {
            id: "ext_missing".to_string(),
        };
        assert!(err.to_string().contains("ext_missing"));
    }

    #[test]
    fn test_no_client_identity_display() {
        let err = Error::NoClientIdentity;
        assert!(err.to_string().contains("register --save"));
        assert!(!err.is_service_error());
    }

    #[test]
    fn test_service_error() {
        let err = Error::Service {
            status: 429,
            code: Some("quota_exceeded".to_string()),
            message: "Daily limit reached".to_string(),
        };
        assert!(err.is_service_error());
        assert_eq!(err.service_code(), Some("quota_exceeded"));
        assert_eq!(err.to_string(), "service error (429): Daily limit reached");

        assert!(!Error::internal("x").is_service_error());
        assert_eq!(Error::internal("x").service_code(), None);
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_rusqlite_error() {
        let result = rusqlite::Connection::open_with_flags(
            "/nonexistent/path/db.sqlite",
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        );
        if let Err(sqlite_err) = result {
            let err: Error = sqlite_err.into();
            assert!(matches!(err, Error::DatabaseQuery(_)));
        }
    }

    #[test]
    fn test_from_json_error() {
        let json_result: std::result::Result<i32, serde_json::Error> =
            serde_json::from_str("not valid json");
        if let Err(json_err) = json_result {
            let err: Error = json_err.into();
            assert!(matches!(err, Error::Json(_)));
        }
    }

    #[test]
    fn test_database_migration_error_display() {
        let err = Error::DatabaseMigration {
            message: "version mismatch".to_string(),
        };
        assert!(err.to_string().contains("version mismatch"));
    }

    #[test]
    fn test_directory_create_error_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = Error::DirectoryCreate {
            path: PathBuf::from("/root/forbidden"),
            source: io_err,
        };
        assert!(err.to_string().contains("/root/forbidden"));
    }
}
