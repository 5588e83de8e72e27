//! Handler functions for authentication-related API endpoints.
//!
//! These functions parse request bodies and delegate to [`AuthService`] for
//! registration, login, token refresh and logout.
//!
//! [`AuthService`]: super::service::AuthService

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use validator::Validate;

use super::models::{LoginRequest, RefreshTokenRequest, RegisterRequest, RegisterResponse};
use super::tokens::TokenPair;
use crate::errors::ServiceResult;
use crate::middleware::JsonBody;
use crate::AppState;

pub async fn register(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<RegisterRequest>,
) -> ServiceResult<(StatusCode, Json<RegisterResponse>)> {
    let identity = state.auth.register(request).await?;
    Ok((StatusCode::CREATED, Json(identity.into())))
}

pub async fn login(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<LoginRequest>,
) -> ServiceResult<Json<TokenPair>> {
    Ok(Json(state.auth.login(request).await?))
}

pub async fn refresh(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<RefreshTokenRequest>,
) -> ServiceResult<Json<TokenPair>> {
    request.validate()?;
    Ok(Json(state.auth.refresh(&request.refresh).await?))
}

pub async fn logout(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<RefreshTokenRequest>,
) -> ServiceResult<Json<Value>> {
    request.validate()?;
    state.auth.logout(&request.refresh).await?;
    Ok(Json(json!({})))
}
