//! Credential input policy shared by the server and the CLI.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Minimum password length, counted after trimming surrounding whitespace.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Longest accepted email in bytes; matches the `VARCHAR(320)` identity columns.
pub const MAX_EMAIL_LEN: usize = 320;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("email is required")]
    EmailRequired,

    #[error("invalid email")]
    InvalidEmail,

    #[error("password is required")]
    PasswordRequired,

    #[error("password is too short")]
    PasswordTooShort,
}

fn email_regex() -> &'static Regex {
    static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
    EMAIL_RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9._%+\-]+@[a-z0-9.\-]+\.[a-z]{2,}$").expect("email regex is valid")
    })
}

/// Lowercase and trim an email address. Identity records are keyed by this form.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Check the email format and return its normalized form.
pub fn validate_email(email: &str) -> Result<String, ValidationError> {
    let email = normalize_email(email);

    if email.is_empty() {
        return Err(ValidationError::EmailRequired);
    }

    if email.len() > MAX_EMAIL_LEN || !email_regex().is_match(&email) {
        return Err(ValidationError::InvalidEmail);
    }

    Ok(email)
}

pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    let password = password.trim();

    if password.is_empty() {
        return Err(ValidationError::PasswordRequired);
    }

    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::PasswordTooShort);
    }

    Ok(())
}
