//! Defines the HTTP routes for the user directory.

use axum::routing::get;
use axum::Router;

use super::handlers::{get_user, list_users, update_user};
use crate::AppState;

pub fn user_router() -> Router<AppState> {
    let detail = get(get_user).put(update_user).patch(update_user);
    Router::new()
        .route("/users", get(list_users))
        .route("/users/", get(list_users))
        .route("/users/:id", detail.clone())
        .route("/users/:id/", detail)
}
