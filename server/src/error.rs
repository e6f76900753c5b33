//! Unified error handling for the server.
//!
//! Every failure leaves as an [`ErrorBody`] carrying the PostgreSQL error code
//! when there is one, so clients can tell schema problems from outages.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sqlx::postgres::PgDatabaseError;
use tether_engine::error::codes;
use tether_engine::wire::ErrorBody;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("relation \"{0}\" does not exist")]
    UnknownTable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(&'static str),
}

impl AppError {
    fn parts(&self) -> (StatusCode, ErrorBody) {
        match self {
            AppError::Database(sqlx::Error::Database(db_err)) => {
                let code = db_err.code().map(|c| c.into_owned());
                let status = code
                    .as_deref()
                    .map(status_for_code)
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                let details = db_err
                    .try_downcast_ref::<PgDatabaseError>()
                    .and_then(|pg| pg.detail())
                    .map(str::to_string);
                if status.is_server_error() {
                    tracing::error!(code = ?code, "Database error: {}", db_err.message());
                } else {
                    tracing::warn!(code = ?code, "Rejected write: {}", db_err.message());
                }
                (
                    status,
                    body(db_err.message().to_string(), code.as_deref(), details),
                )
            }
            AppError::Database(sqlx::Error::RowNotFound) => (
                StatusCode::NOT_FOUND,
                body("no matching row".into(), Some(codes::NO_ROWS), None),
            ),
            AppError::Database(e) => {
                // Pool exhaustion, I/O and the like; clients retry these.
                tracing::error!("Database unavailable: {:?}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    body("Database unavailable".into(), None, None),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, body(msg.clone(), None, None)),
            AppError::UnknownTable(_) => (
                StatusCode::NOT_FOUND,
                body(self.to_string(), Some(codes::UNDEFINED_TABLE), None),
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                body(msg.clone(), Some(codes::NO_ROWS), None),
            ),
            AppError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, body((*msg).to_string(), None, None))
            }
        }
    }
}

fn body(error: String, code: Option<&str>, details: Option<String>) -> ErrorBody {
    ErrorBody {
        error,
        code: code.map(str::to_string),
        details,
        hint: code.and_then(codes::hint).map(str::to_string),
    }
}

/// HTTP status for a PostgreSQL SQLSTATE.
fn status_for_code(code: &str) -> StatusCode {
    match code {
        codes::UNIQUE_VIOLATION => StatusCode::CONFLICT,
        codes::UNDEFINED_TABLE => StatusCode::NOT_FOUND,
        // Integrity constraint violations and syntax/access rule violations
        c if c.starts_with("23") || c.starts_with("42") || c.starts_with("22") => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = self.parts();
        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
