//! Rust structs that represent database table mappings.
//!
//! These models define the structure of data as it is stored in and retrieved
//! from the database. API views live in `api::user::models` and never carry
//! the password hash.

use std::fmt;

use sqlx::FromRow;

pub type IdentityId = i64;

/// A row of the `identities` table.
#[derive(Clone, PartialEq, Eq, FromRow)]
pub struct Identity {
    pub id: IdentityId,
    pub username: String,
    pub password_hash: String,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub mentor_id: Option<IdentityId>,
    /// Unix timestamp (seconds).
    pub created_at: i64,
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("password_hash", &"<redacted>")
            .field("email", &self.email)
            .field("phone_number", &self.phone_number)
            .field("mentor_id", &self.mentor_id)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Values for a freshly registered identity. The password is already hashed.
pub struct NewIdentity {
    pub username: String,
    pub password_hash: String,
    pub email: Option<String>,
    pub phone_number: Option<String>,
}

/// One entry of the directory listing.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct IdentitySummary {
    pub id: IdentityId,
    pub username: String,
    pub is_mentor: bool,
}

/// Why a refresh token left the active state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
pub enum RevocationReason {
    /// Exchanged for a new pair.
    Rotated,
    /// Explicit logout.
    Logout,
}

/// A row of the `revoked_tokens` table.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct RevokedToken {
    pub token_id: String,
    pub subject_id: IdentityId,
    pub reason: RevocationReason,
    pub revoked_at: i64,
    /// Natural expiry of the revoked token.
    pub expires_at: i64,
}

/// One page of an ordered listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Total number of rows across all pages.
    pub count: i64,
    pub next: Option<u32>,
    pub previous: Option<u32>,
    pub results: Vec<T>,
}
