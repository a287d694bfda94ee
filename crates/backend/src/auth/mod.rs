//! Email/password authentication with rotating access/refresh token pairs.
//!
//! This module provides:
//! - Argon2id password hashing
//! - Minting and verification of the two token classes
//! - `AuthEngine`, which runs SignUp, SignIn, RefreshToken and RevokeToken
//!   against a `CredentialStore`
//! - HTTP handlers and request middleware

mod error;
pub mod handlers;
pub mod jwt;
pub mod middleware;
mod password;
mod service;

pub use error::AuthError;
pub use service::AuthEngine;
