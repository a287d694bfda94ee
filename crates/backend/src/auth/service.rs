//! The auth engine: signup, signin, rotation and revocation.
//!
//! The engine is stateless between calls. All state lives in the credential
//! store, whose per-key atomic primitives (insert-if-absent, delete with
//! confirmation) are the only serialization points between concurrent calls.

use std::future::Future;
use std::time::Duration;

use shared_types::CredentialsRequest;

use super::error::AuthError;
use super::jwt::{Claims, TokenClass, TokenCodec, TokenError, TokenPair};
use super::password::PasswordHashing;
use crate::config::AuthConfig;
use crate::store::{DynStore, StoreError, UserData};

pub struct AuthEngine {
    store: DynStore,
    codec: TokenCodec,
    hashing: PasswordHashing,
    store_timeout: Duration,
}

impl AuthEngine {
    pub fn new(
        store: DynStore,
        config: &AuthConfig,
        store_timeout: Duration,
    ) -> Result<Self, AuthError> {
        Ok(Self {
            store,
            codec: TokenCodec::new(config),
            hashing: PasswordHashing::new(config)?,
            store_timeout,
        })
    }

    #[cfg(test)]
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Bound a store call by the configured timeout.
    ///
    /// Dropping the returned future (client gone, request timeout) cancels
    /// the call in flight.
    async fn store_call<T, F>(&self, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.store_timeout, call)
            .await
            .map_err(|_| StoreError::Timeout)?
    }

    fn mint(&self, subject: &str) -> Result<TokenPair, AuthError> {
        self.codec
            .mint(subject)
            .map_err(|e| AuthError::Internal(format!("Failed to mint tokens: {}", e)))
    }

    /// Register a new identity. No tokens are issued.
    pub async fn sign_up(&self, req: &CredentialsRequest) -> Result<String, AuthError> {
        let email = req.validate()?;

        if self
            .store_call(self.store.get_user_by_email(&email))
            .await?
            .is_some()
        {
            return Err(AuthError::AlreadyExists);
        }

        let password_hash = self.hashing.hash(req.password.clone()).await?;
        let user = UserData {
            email: email.clone(),
            password_hash,
        };

        // The lookup above is only a fast path; the conditional insert decides.
        match self.store_call(self.store.create_user(&user)).await {
            Ok(()) => {}
            Err(StoreError::AlreadyExists) => return Err(AuthError::AlreadyExists),
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(email = %email, "User signed up");
        Ok(email)
    }

    /// Authenticate credentials and issue a brand-new token pair.
    pub async fn sign_in(&self, req: &CredentialsRequest) -> Result<TokenPair, AuthError> {
        let email = req.validate()?;

        let Some(user) = self
            .store_call(self.store.get_user_by_email(&email))
            .await?
        else {
            self.hashing.verify_dummy(req.password.clone()).await?;
            return Err(AuthError::NotFound);
        };

        let matches = self
            .hashing
            .verify(req.password.clone(), user.password_hash)
            .await?;
        if !matches {
            return Err(AuthError::PasswordMismatch);
        }

        let pair = self.mint(&email)?;
        self.store_call(self.store.create_token_entries(&pair))
            .await?;

        tracing::debug!(
            access_id = %pair.access.id,
            refresh_id = %pair.refresh.id,
            "Issued token pair"
        );
        Ok(pair)
    }

    /// Rotate a live pair: delete both old entries, then mint and record a new one.
    ///
    /// The delete is the commit point. If another caller already consumed
    /// either entry, the delete is partial and this call fails closed with
    /// `TokenRevoked` instead of minting a duplicate pair.
    pub async fn refresh_token(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<TokenPair, AuthError> {
        let access = self.codec.verify(access_token, TokenClass::Access)?;
        let refresh = self.codec.verify(refresh_token, TokenClass::Refresh)?;

        if access.sub != refresh.sub {
            return Err(TokenError::PairMismatch.into());
        }

        let entry = self
            .store_call(self.store.token_entry(access.jti))
            .await?
            .ok_or(AuthError::TokenRevoked)?;

        if entry.pair_id != refresh.jti {
            tracing::debug!(access_id = %access.jti, "Refresh token does not belong to access token");
            return Err(TokenError::PairMismatch.into());
        }

        match self
            .store_call(self.store.delete_token_entries(&[access.jti, refresh.jti]))
            .await
        {
            Ok(()) => {}
            Err(StoreError::PartialDelete { missing, .. }) => {
                tracing::debug!(?missing, "Lost rotation race or refresh token already revoked");
                return Err(AuthError::TokenRevoked);
            }
            Err(e) => return Err(e.into()),
        }

        let pair = self.mint(&access.sub)?;
        self.store_call(self.store.create_token_entries(&pair))
            .await?;

        tracing::debug!(
            old_access_id = %access.jti,
            access_id = %pair.access.id,
            "Rotated token pair"
        );
        Ok(pair)
    }

    /// Revoke the session behind `access_token`: its entry and its paired
    /// refresh entry are both removed.
    ///
    /// Idempotent. Revoking a token whose entry is already gone succeeds, as
    /// does losing a delete race with a concurrent revoke.
    pub async fn revoke_token(&self, access_token: &str) -> Result<(), AuthError> {
        let access = self.codec.verify(access_token, TokenClass::Access)?;

        let Some(entry) = self
            .store_call(self.store.token_entry(access.jti))
            .await?
        else {
            tracing::debug!(access_id = %access.jti, "Token already revoked");
            return Ok(());
        };

        match self
            .store_call(self.store.delete_token_entries(&[entry.token_id, entry.pair_id]))
            .await
        {
            Ok(()) => {}
            Err(StoreError::PartialDelete { missing, .. }) => {
                tracing::debug!(?missing, "Some entries were already gone during revoke");
            }
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(access_id = %access.jti, refresh_id = %entry.pair_id, "Revoked token pair");
        Ok(())
    }

    /// Verify an access token and confirm it is still live in the registry.
    ///
    /// A valid signature alone is not enough once the registry has dropped
    /// the entry.
    pub async fn authenticate(&self, access_token: &str) -> Result<Claims, AuthError> {
        let claims = self.codec.verify(access_token, TokenClass::Access)?;

        if !self
            .store_call(self.store.is_token_live(claims.jti))
            .await?
        {
            return Err(AuthError::TokenRevoked);
        }

        Ok(claims)
    }

    #[cfg(test)]
    pub async fn is_live(&self, token_id: uuid::Uuid) -> Result<bool, AuthError> {
        Ok(self.store_call(self.store.is_token_live(token_id)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CredentialStore, MemoryStore, RegistryEntry};
    use async_trait::async_trait;
    use std::sync::Arc;
    use uuid::Uuid;

    fn engine_with(store: Arc<MemoryStore>) -> AuthEngine {
        AuthEngine::new(store, &AuthConfig::for_tests(), Duration::from_secs(5)).unwrap()
    }

    fn creds(email: &str, password: &str) -> CredentialsRequest {
        CredentialsRequest::new(email, password)
    }

    async fn signed_in(engine: &AuthEngine) -> TokenPair {
        engine.sign_up(&creds("a@b.com", "password1")).await.unwrap();
        engine.sign_in(&creds("a@b.com", "password1")).await.unwrap()
    }

    #[tokio::test]
    async fn test_sign_up_then_sign_in() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone());

        let email = engine.sign_up(&creds("a@b.com", "password1")).await.unwrap();
        assert_eq!(email, "a@b.com");

        let pair = engine.sign_in(&creds("a@b.com", "password1")).await.unwrap();
        assert_ne!(pair.access.id, pair.refresh.id);

        let claims = engine
            .codec()
            .verify(&pair.access.token, TokenClass::Access)
            .unwrap();
        assert_eq!(claims.sub, "a@b.com");
        assert!(engine.is_live(pair.access.id).await.unwrap());
        assert!(engine.is_live(pair.refresh.id).await.unwrap());
        assert_eq!(store.registry_len().await, 2);
    }

    #[tokio::test]
    async fn test_sign_up_normalizes_email() {
        let engine = engine_with(Arc::new(MemoryStore::new()));
        engine
            .sign_up(&creds("  A@B.com ", "password1"))
            .await
            .unwrap();

        let pair = engine.sign_in(&creds("a@b.COM", "password1")).await.unwrap();
        assert_eq!(pair.subject, "a@b.com");
    }

    #[tokio::test]
    async fn test_sign_up_twice_fails_and_keeps_original() {
        let engine = engine_with(Arc::new(MemoryStore::new()));
        engine.sign_up(&creds("a@b.com", "password1")).await.unwrap();

        let second = engine.sign_up(&creds("A@b.com", "password2")).await;
        assert!(matches!(second, Err(AuthError::AlreadyExists)));

        // Original password still works, the second one does not
        assert!(engine.sign_in(&creds("a@b.com", "password1")).await.is_ok());
        assert!(matches!(
            engine.sign_in(&creds("a@b.com", "password2")).await,
            Err(AuthError::PasswordMismatch)
        ));
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let engine = engine_with(Arc::new(MemoryStore::new()));

        assert!(matches!(
            engine.sign_up(&creds("not-an-email", "password1")).await,
            Err(AuthError::Validation(_))
        ));
        assert!(matches!(
            engine.sign_up(&creds("a@b.com", "short")).await,
            Err(AuthError::Validation(_))
        ));
        assert!(matches!(
            engine.sign_in(&creds("", "password1")).await,
            Err(AuthError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_sign_in_unknown_user() {
        let engine = engine_with(Arc::new(MemoryStore::new()));
        let err = engine
            .sign_in(&creds("ghost@b.com", "password1"))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::NotFound));
        assert!(err.is_credential_failure());
    }

    #[tokio::test]
    async fn test_credential_failures_both_verify_a_hash() {
        let engine = engine_with(Arc::new(MemoryStore::new()));
        engine.sign_up(&creds("a@b.com", "password1")).await.unwrap();

        let before = engine.hashing.verification_count();
        assert!(matches!(
            engine.sign_in(&creds("ghost@b.com", "password1")).await,
            Err(AuthError::NotFound)
        ));
        assert_eq!(engine.hashing.verification_count(), before + 1);

        assert!(matches!(
            engine.sign_in(&creds("a@b.com", "password2")).await,
            Err(AuthError::PasswordMismatch)
        ));
        assert_eq!(engine.hashing.verification_count(), before + 2);
    }

    #[tokio::test]
    async fn test_wrong_password_mints_nothing() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone());
        engine.sign_up(&creds("a@b.com", "password1")).await.unwrap();

        let err = engine
            .sign_in(&creds("a@b.com", "password2"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::PasswordMismatch));
        assert_eq!(store.registry_len().await, 0);
    }

    #[tokio::test]
    async fn test_each_sign_in_mints_unrelated_ids() {
        let engine = engine_with(Arc::new(MemoryStore::new()));
        let first = signed_in(&engine).await;
        let second = engine.sign_in(&creds("a@b.com", "password1")).await.unwrap();

        assert_ne!(first.access.id, second.access.id);
        assert_ne!(first.refresh.id, second.refresh.id);
        // Both sessions stay live independently
        assert!(engine.is_live(first.access.id).await.unwrap());
        assert!(engine.is_live(second.access.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_old_pair_is_revoked() {
        let engine = engine_with(Arc::new(MemoryStore::new()));
        let old = signed_in(&engine).await;

        let new = engine
            .refresh_token(&old.access.token, &old.refresh.token)
            .await
            .unwrap();
        assert_ne!(new.access.token, old.access.token);
        assert_ne!(new.refresh.token, old.refresh.token);
        assert_ne!(new.access.id, old.access.id);
        assert_eq!(new.subject, "a@b.com");

        assert!(!engine.is_live(old.access.id).await.unwrap());
        assert!(!engine.is_live(old.refresh.id).await.unwrap());
        assert!(engine.is_live(new.access.id).await.unwrap());

        let replay = engine
            .refresh_token(&old.access.token, &old.refresh.token)
            .await;
        assert!(matches!(replay, Err(AuthError::TokenRevoked)));

        // The new pair keeps rotating
        assert!(engine
            .refresh_token(&new.access.token, &new.refresh.token)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_refresh_rejects_swapped_or_foreign_tokens() {
        let engine = engine_with(Arc::new(MemoryStore::new()));
        let pair = signed_in(&engine).await;

        // Classes swapped: each fails verification in the other domain
        assert!(matches!(
            engine
                .refresh_token(&pair.refresh.token, &pair.access.token)
                .await,
            Err(AuthError::InvalidToken(_))
        ));
        assert!(matches!(
            engine.refresh_token("garbage", &pair.refresh.token).await,
            Err(AuthError::InvalidToken(_))
        ));

        // Refresh token from a different session of the same user
        let other = engine.sign_in(&creds("a@b.com", "password1")).await.unwrap();
        assert!(matches!(
            engine
                .refresh_token(&pair.access.token, &other.refresh.token)
                .await,
            Err(AuthError::InvalidToken(TokenError::PairMismatch))
        ));
        // Nothing was consumed by the rejected attempts
        assert!(engine.is_live(pair.access.id).await.unwrap());
        assert!(engine.is_live(other.refresh.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_blocks_refresh_and_is_idempotent() {
        let engine = engine_with(Arc::new(MemoryStore::new()));
        let pair = signed_in(&engine).await;

        engine.revoke_token(&pair.access.token).await.unwrap();
        assert!(!engine.is_live(pair.access.id).await.unwrap());
        // The paired refresh entry goes too
        assert!(!engine.is_live(pair.refresh.id).await.unwrap());

        assert!(matches!(
            engine
                .refresh_token(&pair.access.token, &pair.refresh.token)
                .await,
            Err(AuthError::TokenRevoked)
        ));

        engine.revoke_token(&pair.access.token).await.unwrap();
    }

    #[tokio::test]
    async fn test_revoke_succeeds_when_refresh_entry_already_gone() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone());
        let pair = signed_in(&engine).await;

        store.delete_token_entries(&[pair.refresh.id]).await.unwrap();

        engine.revoke_token(&pair.access.token).await.unwrap();
        assert!(!engine.is_live(pair.access.id).await.unwrap());
        assert_eq!(store.registry_len().await, 0);
    }

    #[tokio::test]
    async fn test_revoke_requires_valid_access_token() {
        let engine = engine_with(Arc::new(MemoryStore::new()));
        let pair = signed_in(&engine).await;

        assert!(matches!(
            engine.revoke_token(&pair.refresh.token).await,
            Err(AuthError::InvalidToken(TokenError::SignatureInvalid))
        ));
        assert!(matches!(
            engine.revoke_token("not.a.jwt").await,
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn test_authenticate_honours_registry() {
        let engine = engine_with(Arc::new(MemoryStore::new()));
        let pair = signed_in(&engine).await;

        let claims = engine.authenticate(&pair.access.token).await.unwrap();
        assert_eq!(claims.sub, "a@b.com");

        engine.revoke_token(&pair.access.token).await.unwrap();
        let err = engine.authenticate(&pair.access.token).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenRevoked));
        assert!(err.is_token_failure());
    }

    #[tokio::test]
    async fn test_concurrent_refresh_has_single_winner() {
        let engine = Arc::new(engine_with(Arc::new(MemoryStore::new())));
        let pair = signed_in(&engine).await;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let access = pair.access.token.clone();
                let refresh = pair.refresh.token.clone();
                tokio::spawn(async move { engine.refresh_token(&access, &refresh).await })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(e) => assert!(matches!(e, AuthError::TokenRevoked)),
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_revoked_refresh_entry_fails_rotation_closed() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone());
        let pair = signed_in(&engine).await;

        // Only the refresh entry disappears
        store.delete_token_entries(&[pair.refresh.id]).await.unwrap();

        assert!(matches!(
            engine
                .refresh_token(&pair.access.token, &pair.refresh.token)
                .await,
            Err(AuthError::TokenRevoked)
        ));
        assert_eq!(store.registry_len().await, 0);
    }

    /// A store whose every call hangs, to exercise the timeout path.
    struct StalledStore;

    #[async_trait]
    impl CredentialStore for StalledStore {
        async fn create_user(&self, _: &UserData) -> Result<(), StoreError> {
            std::future::pending().await
        }
        async fn get_user_by_email(&self, _: &str) -> Result<Option<UserData>, StoreError> {
            std::future::pending().await
        }
        async fn create_token_entries(&self, _: &TokenPair) -> Result<(), StoreError> {
            std::future::pending().await
        }
        async fn delete_token_entries(&self, _: &[Uuid]) -> Result<(), StoreError> {
            std::future::pending().await
        }
        async fn is_token_live(&self, _: Uuid) -> Result<bool, StoreError> {
            std::future::pending().await
        }
        async fn token_entry(&self, _: Uuid) -> Result<Option<RegistryEntry>, StoreError> {
            std::future::pending().await
        }
        async fn purge_expired(&self) -> Result<u64, StoreError> {
            std::future::pending().await
        }
        async fn ping(&self) -> Result<(), StoreError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_stalled_store_times_out() {
        let engine = AuthEngine::new(
            Arc::new(StalledStore),
            &AuthConfig::for_tests(),
            Duration::from_millis(20),
        )
        .unwrap();

        let err = engine
            .sign_in(&creds("a@b.com", "password1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Store(StoreError::Timeout)));
    }
}
