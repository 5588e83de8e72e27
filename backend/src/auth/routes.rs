//! Defines the HTTP routes specifically for authentication.
//!
//! These routes handle registration, login, token refreshing and logout. They
//! are merged into the main Axum router under `/api`.

use axum::routing::post;
use axum::Router;

use super::handlers::{login, logout, refresh, register};
use crate::AppState;

pub fn auth_router() -> Router<AppState> {
    Router::new()
        .route("/registration", post(register))
        .route("/registration/", post(register))
        .route("/login", post(login))
        .route("/login/", post(login))
        .route("/refresh", post(refresh))
        .route("/refresh/", post(refresh))
        .route("/logout", post(logout))
        .route("/logout/", post(logout))
}
