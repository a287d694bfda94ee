//! Credential store: identity records and the TTL-backed token registry.
//!
//! A token is live iff its registry entry exists and has not expired. There
//! is no separate revoked flag, absence is revocation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::auth::jwt::{TokenClass, TokenPair};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Identity record keyed by normalized email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserData {
    pub email: String,
    pub password_hash: String,
}

/// One live token in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub token_id: Uuid,
    pub subject: String,
    pub class: TokenClass,
    /// Id of the other token minted in the same pair.
    pub pair_id: Uuid,
    /// Unix timestamp (seconds)
    pub expires_at: i64,
}

impl RegistryEntry {
    /// Registry entries for both halves of a freshly minted pair.
    pub fn for_pair(pair: &TokenPair) -> [RegistryEntry; 2] {
        [
            RegistryEntry {
                token_id: pair.access.id,
                subject: pair.subject.clone(),
                class: TokenClass::Access,
                pair_id: pair.refresh.id,
                expires_at: pair.access.expires_at,
            },
            RegistryEntry {
                token_id: pair.refresh.id,
                subject: pair.subject.clone(),
                class: TokenClass::Refresh,
                pair_id: pair.access.id,
                expires_at: pair.refresh.expires_at,
            },
        ]
    }

    /// Remaining lifetime in seconds at `now`; zero or less means already dead.
    pub fn ttl_secs(&self, now: i64) -> i64 {
        self.expires_at - now
    }

    pub fn is_live_at(&self, now: i64) -> bool {
        self.ttl_secs(now) > 0
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("user already exists")]
    AlreadyExists,

    /// Fewer registry entries were deleted than requested. `missing` lists the
    /// ids whose deletion was not confirmed.
    #[error("partial delete: {} of {requested} entries not confirmed", .missing.len())]
    PartialDelete { requested: usize, missing: Vec<Uuid> },

    #[error("store operation timed out")]
    Timeout,

    #[error("Database connection error: {0}")]
    Pool(String),

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("{0}")]
    Backend(String),
}

impl StoreError {
    /// Transient failures the transport layer may choose to retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Timeout | StoreError::Pool(_))
    }
}

/// Storage operations the auth engine depends on.
///
/// Implementations must make each primitive atomic: `create_user` is an
/// insert-if-absent and `delete_token_entries` must confirm each id at most
/// once across concurrent callers.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert the identity if absent; `StoreError::AlreadyExists` otherwise.
    async fn create_user(&self, user: &UserData) -> Result<(), StoreError>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserData>, StoreError>;

    /// Record both halves of `pair`. Entries with no remaining TTL are skipped.
    async fn create_token_entries(&self, pair: &TokenPair) -> Result<(), StoreError>;

    /// Delete every id in `ids`; `StoreError::PartialDelete` if any id was
    /// already absent.
    async fn delete_token_entries(&self, ids: &[Uuid]) -> Result<(), StoreError>;

    async fn is_token_live(&self, token_id: Uuid) -> Result<bool, StoreError>;

    async fn token_entry(&self, token_id: Uuid) -> Result<Option<RegistryEntry>, StoreError>;

    /// Physically remove expired entries. Returns how many were removed.
    async fn purge_expired(&self) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

pub type DynStore = Arc<dyn CredentialStore>;

/// Ids from `requested` that are not in `deleted`, in request order.
pub(crate) fn unconfirmed(requested: &[Uuid], deleted: &[Uuid]) -> Vec<Uuid> {
    requested
        .iter()
        .filter(|id| !deleted.contains(id))
        .copied()
        .collect()
}

pub(crate) fn now_unix() -> i64 {
    Utc::now().timestamp()
}

/// Start a background task that periodically purges expired registry entries.
///
/// Lookups already treat expired entries as absent; this only reclaims space.
pub fn spawn_registry_sweeper(store: DynStore, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("Starting registry sweeper (interval: {:?})", interval);

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match store.purge_expired().await {
                Ok(0) => tracing::debug!("Registry sweep found nothing to purge"),
                Ok(n) => tracing::info!("Purged {} expired registry entries", n),
                Err(e) => tracing::error!("Registry sweep failed: {}", e),
            }
        }
    })
}
