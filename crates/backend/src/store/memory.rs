//! In-process store for development and tests.
//!
//! Expiry is lazy: an entry past its `expires_at` is reported as absent. It is
//! physically removed when a delete touches it or the sweeper purges it.
//! Multi-key operations run under a single write lock, which makes them atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{now_unix, unconfirmed, CredentialStore, RegistryEntry, StoreError, UserData};
use crate::auth::jwt::TokenPair;

#[derive(Debug, Default)]
pub struct MemoryStore {
    /// email -> identity
    users: RwLock<HashMap<String, UserData>>,
    /// token id -> registry entry
    registry: RwLock<HashMap<Uuid, RegistryEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries physically held, expired ones included.
    #[cfg(test)]
    pub async fn registry_len(&self) -> usize {
        self.registry.read().await.len()
    }

    /// Insert an entry verbatim, bypassing the TTL check.
    #[cfg(test)]
    pub async fn insert_entry(&self, entry: RegistryEntry) {
        self.registry.write().await.insert(entry.token_id, entry);
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn create_user(&self, user: &UserData) -> Result<(), StoreError> {
        let mut users = self.users.write().await;

        if users.contains_key(&user.email) {
            return Err(StoreError::AlreadyExists);
        }

        users.insert(user.email.clone(), user.clone());
        tracing::debug!(email = %user.email, "User saved to memory store");

        Ok(())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserData>, StoreError> {
        Ok(self.users.read().await.get(email).cloned())
    }

    async fn create_token_entries(&self, pair: &TokenPair) -> Result<(), StoreError> {
        let now = now_unix();
        let mut registry = self.registry.write().await;

        for entry in RegistryEntry::for_pair(pair) {
            if entry.is_live_at(now) {
                registry.insert(entry.token_id, entry);
            }
        }

        Ok(())
    }

    async fn delete_token_entries(&self, ids: &[Uuid]) -> Result<(), StoreError> {
        let now = now_unix();
        let mut registry = self.registry.write().await;

        let mut deleted = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entry) = registry.remove(id) {
                if entry.is_live_at(now) {
                    deleted.push(*id);
                }
            }
        }

        if deleted.len() != ids.len() {
            return Err(StoreError::PartialDelete {
                requested: ids.len(),
                missing: unconfirmed(ids, &deleted),
            });
        }

        Ok(())
    }

    async fn is_token_live(&self, token_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.token_entry(token_id).await?.is_some())
    }

    async fn token_entry(&self, token_id: Uuid) -> Result<Option<RegistryEntry>, StoreError> {
        let now = now_unix();
        let registry = self.registry.read().await;

        Ok(registry
            .get(&token_id)
            .filter(|entry| entry.is_live_at(now))
            .cloned())
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let now = now_unix();
        let mut registry = self.registry.write().await;

        let before = registry.len();
        registry.retain(|_, entry| entry.is_live_at(now));

        Ok((before - registry.len()) as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
