//! Authentication module for managing user accounts, sessions, and access control.
//!
//! This module provides the public interface for user authentication-related functionalities
//! such as registration, login, token management, and the access guard.

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod password;
pub mod routes;
pub mod service;
pub mod tokens;

// Re-exports for convenience
pub use errors::*;
pub use middleware::{authorize, Caller, Operation};
pub use password::CredentialService;
pub use routes::auth_router;
pub use service::AuthService;
pub use tokens::{RefreshState, TokenPair, TokenService};
