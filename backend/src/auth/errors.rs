//! Custom error types specific to authentication failures.
//!
//! Every variant surfaces to clients as the same `Unauthenticated` error; the
//! precise reason only reaches the logs.

use thiserror::Error;

use crate::errors::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token signature does not match")]
    BadSignature,
    #[error("token has the wrong type for this operation")]
    WrongType,
    #[error("token has expired")]
    Expired,
    #[error("token was revoked by logout")]
    Revoked,
    #[error("token was already exchanged for a new pair")]
    Rotated,
    #[error("token subject no longer exists")]
    UnknownSubject,
}

impl From<TokenError> for ServiceError {
    fn from(_: TokenError) -> Self {
        ServiceError::Unauthenticated("token is invalid or expired".to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LoginError {
    #[error("no active account found with the given credentials")]
    BadCredentials,
}

impl From<LoginError> for ServiceError {
    fn from(err: LoginError) -> Self {
        ServiceError::Unauthenticated(err.to_string())
    }
}
