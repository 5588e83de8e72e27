//! User directory endpoints: listing, detail and self-service profile edits.

pub mod handlers;
pub mod models;
pub mod routes;

pub use routes::user_router;
