//! Password hashing and verification using Argon2id.
//!
//! Hashing is deliberately slow, so the async entry points move the work onto
//! the blocking thread pool instead of stalling the runtime.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

use std::sync::Arc;

use super::error::AuthError;
use crate::config::AuthConfig;

#[derive(Debug, Clone)]
pub struct PasswordHashing {
    params: Params,
    /// Hash of a throwaway password under the configured cost. Verified
    /// against when no user exists, so both credential failures cost the same.
    dummy_hash: Arc<str>,
    #[cfg(test)]
    verifications: Arc<std::sync::atomic::AtomicUsize>,
}

impl PasswordHashing {
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        let params = Params::new(
            config.argon2_m_cost_kib,
            config.argon2_t_cost,
            config.argon2_p_cost,
            None,
        )
        .map_err(|e| AuthError::Internal(format!("Invalid Argon2 parameters: {e}")))?;

        let mut hashing = Self {
            params,
            dummy_hash: Arc::from(""),
            #[cfg(test)]
            verifications: Arc::default(),
        };
        hashing.dummy_hash = Arc::from(hashing.hash_password(&uuid::Uuid::new_v4().to_string())?);

        Ok(hashing)
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a password, returning the PHC string (salt and parameters included).
    pub fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);

        self.argon2()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::Internal(format!("Failed to hash password: {e}")))
    }

    /// Verify a password against a stored PHC hash.
    ///
    /// Parameters are read from the hash itself, so hashes made under an older
    /// cost setting keep verifying.
    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        #[cfg(test)]
        self.verifications
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| AuthError::Internal(format!("Invalid password hash format: {e}")))?;

        Ok(self
            .argon2()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }

    pub async fn hash(&self, password: String) -> Result<String, AuthError> {
        let hashing = self.clone();
        tokio::task::spawn_blocking(move || hashing.hash_password(&password))
            .await
            .map_err(|e| AuthError::Internal(format!("Password hashing task failed: {e}")))?
    }

    pub async fn verify(&self, password: String, hash: String) -> Result<bool, AuthError> {
        let hashing = self.clone();
        tokio::task::spawn_blocking(move || hashing.verify_password(&password, &hash))
            .await
            .map_err(|e| AuthError::Internal(format!("Password verification task failed: {e}")))?
    }

    /// Run a full verification against the dummy hash and discard the result.
    pub async fn verify_dummy(&self, password: String) -> Result<(), AuthError> {
        self.verify(password, self.dummy_hash.to_string()).await?;
        Ok(())
    }

    /// Number of hash verifications performed so far.
    #[cfg(test)]
    pub fn verification_count(&self) -> usize {
        self.verifications.load(std::sync::atomic::Ordering::SeqCst)
    }
}
