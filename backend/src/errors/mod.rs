//! Global application error types and handlers.
//!
//! This module defines the error taxonomy shared by every core operation
//! (store, credentials, tokens, access guard, profile updates) and the single
//! place where those errors are turned into HTTP responses.

use std::collections::BTreeMap;
use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// SQLite primary result codes that signal lock contention.
const SQLITE_BUSY: i64 = 5;
const SQLITE_LOCKED: i64 = 6;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors returned by every core operation.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed, missing or conflicting input.
    #[error("invalid input: {0}")]
    Validation(FieldErrors),

    /// Missing, invalid, expired or revoked credentials.
    #[error("authentication failed: {0}")]
    Unauthenticated(String),

    /// Authenticated, but not allowed to act on the target.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The target resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint would be violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Transient store or infrastructure failure; callers may retry.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Non-transient fault that is not the caller's doing.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Shorthand for a validation failure on a single field.
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::default();
        errors.push(field, message);
        ServiceError::Validation(errors)
    }

    pub fn unauthenticated() -> Self {
        ServiceError::Unauthenticated("invalid or missing credentials".to_string())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) | ServiceError::Conflict(_) => StatusCode::BAD_REQUEST,
            ServiceError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Per-field validation messages, ordered by field name.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    /// Turns an accumulated set into a result.
    pub fn into_result(self) -> ServiceResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::Validation(self))
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            if !first {
                write!(f, "; ")?;
            }
            first = false;
            write!(f, "{}: {}", field, messages.join(", "))?;
        }
        Ok(())
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields = FieldErrors::default();
        for (field, errs) in errors.field_errors() {
            for err in errs {
                let message = err
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| err.code.to_string());
                fields.push(&field.to_string(), message);
            }
        }
        ServiceError::Validation(fields)
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ServiceError::NotFound("record not found".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                tracing::warn!(error = %err, "store unavailable");
                ServiceError::Unavailable("store unavailable".to_string())
            }
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    return ServiceError::Conflict("username already taken".to_string());
                }
                let contended = db_err
                    .code()
                    .and_then(|code| code.parse::<i64>().ok())
                    .map(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
                    .unwrap_or(false);
                if contended {
                    tracing::warn!(error = %db_err, "store busy");
                    ServiceError::Unavailable("store busy".to_string())
                } else {
                    tracing::error!(error = %db_err, "database error");
                    ServiceError::Internal("database error".to_string())
                }
            }
            other => {
                tracing::error!(error = %other, "unexpected store error");
                ServiceError::Internal("database error".to_string())
            }
        }
    }
}

impl From<tokio::task::JoinError> for ServiceError {
    fn from(err: tokio::task::JoinError) -> Self {
        tracing::error!(error = %err, "blocking worker failed");
        ServiceError::Internal("worker failure".to_string())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            ServiceError::Validation(fields) => json!({
                "detail": "invalid input",
                "errors": fields,
            }),
            ServiceError::Unauthenticated(detail)
            | ServiceError::Forbidden(detail)
            | ServiceError::NotFound(detail)
            | ServiceError::Conflict(detail)
            | ServiceError::Unavailable(detail) => json!({ "detail": detail }),
            ServiceError::Internal(_) => json!({ "detail": "internal server error" }),
        };
        (status, Json(body)).into_response()
    }
}
