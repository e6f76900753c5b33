//! Error types for the Tether engine.

use thiserror::Error;

/// All possible errors surfaced by collection stores.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Precondition errors
    #[error("record is still pending confirmation: {0}")]
    PendingRecord(String),

    // Backend errors
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("scheduled task aborted before completion")]
    TaskAborted,

    // Data errors
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl Error {
    /// The backend error code, when the failure came from the backend.
    pub fn code(&self) -> Option<&str> {
        match self {
            Error::Backend(e) => e.code(),
            _ => None,
        }
    }

    /// Actionable hint for known backend error codes.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Error::Backend(e) => e.hint(),
            _ => None,
        }
    }
}

/// Errors reported by a [`Backend`](crate::Backend) implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("backend unavailable (HTTP {status}): {message}")]
    Unavailable { status: u16, message: String },

    #[error("not authorized by backend")]
    Unauthorized,

    #[error("{message} (code {code})")]
    Database {
        code: String,
        message: String,
        details: Option<String>,
    },

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("invalid backend response: {0}")]
    InvalidResponse(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl BackendError {
    /// Shorthand for a database error without details.
    pub fn database(code: impl Into<String>, message: impl Into<String>) -> Self {
        BackendError::Database {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Only connectivity problems and server-side unavailability qualify.
    /// Schema and referential failures are permanent until someone fixes the
    /// backend, so they are never retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BackendError::Network(_) | BackendError::Timeout | BackendError::Unavailable { .. }
        )
    }

    /// The backend error code, if one was reported.
    pub fn code(&self) -> Option<&str> {
        match self {
            BackendError::Database { code, .. } => Some(code),
            BackendError::NotFound(_) => Some(codes::NO_ROWS),
            _ => None,
        }
    }

    /// Actionable hint for the error code.
    pub fn hint(&self) -> Option<&'static str> {
        self.code().and_then(codes::hint)
    }
}

/// Known backend error codes (PostgreSQL SQLSTATE plus the REST layer's own).
pub mod codes {
    pub const UNDEFINED_TABLE: &str = "42P01";
    pub const UNDEFINED_COLUMN: &str = "42703";
    pub const FOREIGN_KEY_VIOLATION: &str = "23503";
    pub const UNIQUE_VIOLATION: &str = "23505";
    pub const NOT_NULL_VIOLATION: &str = "23502";
    pub const NO_ROWS: &str = "PGRST116";

    /// Map a code to a hint worth putting in front of a developer.
    pub fn hint(code: &str) -> Option<&'static str> {
        match code {
            UNDEFINED_TABLE => Some("table does not exist; run the server migrations"),
            UNDEFINED_COLUMN => {
                Some("field is not a column; add it to the field map exclusions")
            }
            FOREIGN_KEY_VIOLATION => Some("referenced row does not exist"),
            UNIQUE_VIOLATION => Some("a row with this key already exists"),
            NOT_NULL_VIOLATION => Some("a required field is missing"),
            NO_ROWS => Some("no matching row for the current user"),
            _ => None,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::PendingRecord("tmp-1".into());
        assert_eq!(err.to_string(), "record is still pending confirmation: tmp-1");

        let err = Error::Backend(BackendError::database(
            codes::UNIQUE_VIOLATION,
            "duplicate key value",
        ));
        assert_eq!(err.to_string(), "duplicate key value (code 23505)");

        let err = BackendError::Unavailable {
            status: 503,
            message: "maintenance".into(),
        };
        assert_eq!(
            err.to_string(),
            "backend unavailable (HTTP 503): maintenance"
        );
    }

    #[test]
    fn transient_classification() {
        assert!(BackendError::Network("reset".into()).is_transient());
        assert!(BackendError::Timeout.is_transient());
        assert!(BackendError::Unavailable {
            status: 502,
            message: String::new()
        }
        .is_transient());

        assert!(!BackendError::database(codes::UNDEFINED_TABLE, "missing").is_transient());
        assert!(!BackendError::Unauthorized.is_transient());
        assert!(!BackendError::NotFound("x".into()).is_transient());
    }

    #[test]
    fn hints_for_known_codes() {
        let err = Error::Backend(BackendError::database(codes::UNDEFINED_TABLE, "nope"));
        assert_eq!(err.code(), Some("42P01"));
        assert!(err.hint().unwrap().contains("migrations"));

        assert_eq!(BackendError::NotFound("a".into()).code(), Some(codes::NO_ROWS));
        assert!(BackendError::database("XX000", "internal").hint().is_none());
        assert!(Error::TaskAborted.hint().is_none());
    }
}
