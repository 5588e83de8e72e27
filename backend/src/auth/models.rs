//! Data structures for authentication-related entities.
//!
//! Request and response payloads for registration, login, token refresh and
//! logout. Token claims live in [`super::tokens`].

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::database::models::{Identity, IdentityId};
use crate::validation::{non_blank, validate_email, validate_phone_number, validate_username};

/// Registration request payload
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(custom(function = "validate_username"))]
    pub username: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,

    #[serde(default)]
    #[validate(custom(function = "validate_email"))]
    pub email: Option<String>,

    #[serde(default)]
    #[validate(custom(function = "validate_phone_number"))]
    pub phone_number: Option<String>,
}

impl RegisterRequest {
    /// Blank optional fields count as absent.
    pub fn normalized(self) -> Self {
        Self {
            username: self.username.trim().to_string(),
            email: non_blank(self.email),
            phone_number: non_blank(self.phone_number),
            ..self
        }
    }
}

/// Registration response
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterResponse {
    pub id: IdentityId,
    pub username: String,
}

impl From<Identity> for RegisterResponse {
    fn from(identity: Identity) -> Self {
        Self {
            id: identity.id,
            username: identity.username,
        }
    }
}

/// Login request payload
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    pub username: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Body of both refresh and logout requests
#[derive(Debug, Deserialize, Validate)]
pub struct RefreshTokenRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh: String,
}
