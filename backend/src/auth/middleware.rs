//! Middleware for protecting authenticated routes and handling authorization.
//!
//! [`Caller`] resolves the bearer access token of a request into an identity
//! id. [`authorize`] is the access guard: reads need any authenticated caller,
//! writes need the caller to be the target, and only the session endpoints are
//! open to anonymous callers. Core operations receive the caller explicitly
//! and call [`authorize`] themselves.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::database::models::IdentityId;
use crate::errors::{ServiceError, ServiceResult};
use crate::AppState;

/// Operations the guard knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Register,
    Login,
    Refresh,
    Logout,
    ListIdentities,
    ReadIdentity(IdentityId),
    UpdateIdentity(IdentityId),
}

impl Operation {
    /// Open to anonymous callers.
    pub fn is_public(&self) -> bool {
        matches!(
            self,
            Operation::Register | Operation::Login | Operation::Refresh | Operation::Logout
        )
    }
}

/// Decides whether `caller` may perform `operation`.
pub fn authorize(caller: Option<IdentityId>, operation: Operation) -> ServiceResult<()> {
    if operation.is_public() {
        return Ok(());
    }
    let Some(caller) = caller else {
        return Err(ServiceError::Unauthenticated(
            "authentication credentials were not provided".to_string(),
        ));
    };
    match operation {
        Operation::UpdateIdentity(target) if target != caller => Err(ServiceError::Forbidden(
            "you may only modify your own profile".to_string(),
        )),
        _ => Ok(()),
    }
}

/// The identity behind the request's bearer token, if one was sent.
///
/// A header that is present but invalid rejects the request outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller(pub Option<IdentityId>);

/// Extracts the raw token from an `Authorization: Bearer <token>` value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(header) = parts.headers.get(AUTHORIZATION) else {
            return Ok(Caller(None));
        };

        let token = header
            .to_str()
            .ok()
            .and_then(bearer_token)
            .ok_or_else(|| ServiceError::Unauthenticated("malformed authorization header".to_string()))?;

        match state.tokens.verify_access(token) {
            Ok(id) => Ok(Caller(Some(id))),
            Err(err) => {
                tracing::warn!(reason = %err, "bearer token rejected");
                Err(err.into())
            }
        }
    }
}
