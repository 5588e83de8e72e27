//! MentorLink backend: a directory of user identities with mentor/mentee
//! relations and token-based sessions, served over HTTP with Axum.

pub mod api;
pub mod auth;
pub mod config;
pub mod database;
pub mod errors;
pub mod middleware;
pub mod services;
pub mod validation;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::auth::{AuthService, CredentialService, TokenService};
use crate::config::Config;
use crate::database::{Database, IdentityStore};
use crate::errors::ServiceResult;
use crate::services::{DirectoryService, ProfileUpdateEngine};

/// Shared handler state. Every field is cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub auth: AuthService,
    pub tokens: TokenService,
    pub directory: DirectoryService,
    pub profiles: ProfileUpdateEngine,
}

impl AppState {
    pub fn new(config: &Config, db: Database) -> ServiceResult<Self> {
        let store = IdentityStore::new(db.clone());
        let credentials = CredentialService::new(&config.password)?;
        let tokens = TokenService::new(&config.secret_key, &config.tokens, db);

        Ok(Self {
            auth: AuthService::new(store.clone(), credentials.clone(), tokens.clone()),
            tokens,
            directory: DirectoryService::new(store.clone(), config.pagination.clone()),
            profiles: ProfileUpdateEngine::new(store, credentials),
        })
    }
}

/// The full HTTP surface: `/health` plus everything under `/api`.
pub fn app(state: AppState) -> Router {
    let api = auth::auth_router().merge(api::user::user_router());

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
