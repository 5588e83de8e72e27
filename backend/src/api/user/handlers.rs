//! Handler functions for the user directory endpoints.
//!
//! Listing and detail reads go to [`DirectoryService`], updates to
//! [`ProfileUpdateEngine`]. The caller comes from the bearer token, if any.
//!
//! Query, path and body rejections are only surfaced once the caller has
//! passed the guard, so an anonymous request is always `401`.
//!
//! [`DirectoryService`]: crate::services::DirectoryService
//! [`ProfileUpdateEngine`]: crate::services::ProfileUpdateEngine

use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::Json;

use super::models::{IdentityView, ListQuery, ProfileUpdate, UserListResponse};
use crate::auth::{authorize, Caller, Operation};
use crate::database::models::IdentityId;
use crate::errors::{ServiceError, ServiceResult};
use crate::middleware::JsonBody;
use crate::AppState;

fn target_id(
    caller: Option<IdentityId>,
    path: Result<Path<IdentityId>, PathRejection>,
) -> ServiceResult<IdentityId> {
    match path {
        Ok(Path(id)) => Ok(id),
        Err(_) if caller.is_none() => Err(ServiceError::unauthenticated()),
        Err(_) => Err(ServiceError::NotFound("user not found".to_string())),
    }
}

pub async fn list_users(
    State(state): State<AppState>,
    Caller(caller): Caller,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ServiceResult<Json<UserListResponse>> {
    authorize(caller, Operation::ListIdentities)?;
    let Query(query) =
        query.map_err(|rejection| ServiceError::invalid("query", rejection.body_text()))?;
    let page = state
        .directory
        .list(caller, query.page, query.page_size)
        .await?;
    Ok(Json(page.into()))
}

pub async fn get_user(
    State(state): State<AppState>,
    Caller(caller): Caller,
    path: Result<Path<IdentityId>, PathRejection>,
) -> ServiceResult<Json<IdentityView>> {
    let id = target_id(caller, path)?;
    Ok(Json(state.directory.detail(caller, id).await?))
}

/// Serves both `PUT` and `PATCH`; either way only the fields sent change.
pub async fn update_user(
    State(state): State<AppState>,
    Caller(caller): Caller,
    path: Result<Path<IdentityId>, PathRejection>,
    body: Result<JsonBody<ProfileUpdate>, ServiceError>,
) -> ServiceResult<Json<IdentityView>> {
    let id = target_id(caller, path)?;
    let update = match body {
        Ok(JsonBody(update)) => update,
        Err(rejection) => {
            state.profiles.check_access(caller, id).await?;
            return Err(rejection);
        }
    };
    Ok(Json(state.profiles.apply(caller, id, update).await?))
}
