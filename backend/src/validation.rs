//! Field-level validators for identity attributes.
//!
//! Shared by the request models (through `validator` derives) and by the
//! identity store, which re-checks its invariants on every write.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;
use validator::{ValidateEmail, ValidationError};

pub const USERNAME_MAX_LEN: usize = 150;

/// Optional leading `+`, first digit 1-9, 9 to 15 digits in total.
static PHONE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[1-9]\d{8,14}$").expect("phone pattern is valid"));

/// Letters, digits and `@ . + - _`.
static USERNAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\w.@+-]+$").expect("username pattern is valid"));

fn error(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(Cow::Borrowed(message));
    err
}

pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    if username.is_empty() {
        return Err(error("required", "username must not be empty"));
    }
    if username.chars().count() > USERNAME_MAX_LEN {
        return Err(error("length", "username must be at most 150 characters"));
    }
    if !USERNAME.is_match(username) {
        return Err(error(
            "format",
            "username may contain only letters, digits and @/./+/-/_",
        ));
    }
    Ok(())
}

pub fn validate_phone_number(phone: &str) -> Result<(), ValidationError> {
    if PHONE_NUMBER.is_match(phone) {
        Ok(())
    } else {
        Err(error(
            "phone_number",
            "phone number must be in international format: optional '+', 9 to 15 digits",
        ))
    }
}

pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    if email.validate_email() {
        Ok(())
    } else {
        Err(error("email", "enter a valid email address"))
    }
}

/// Treats blank strings as "not supplied".
pub fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// The message carried by a validation error, for `FieldErrors`.
pub fn message_of(err: &ValidationError) -> String {
    err.message
        .as_ref()
        .map(|m| m.to_string())
        .unwrap_or_else(|| err.code.to_string())
}
