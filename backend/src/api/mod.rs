//! Central module for organizing the application's main API endpoints.
//!
//! Authentication routes live in `auth`; everything about browsing and
//! editing identities lives here.

pub mod user;
