//! Postgres-backed credential store.
//!
//! Registry rows carry an absolute `expires_at`; rows past it are treated as
//! absent by every read and delete (lazy expiry) and reclaimed by the sweeper.
//! Concurrent deletes of the same row serialize on its row lock, so only one
//! caller sees it in `RETURNING`.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{
    pooled_connection::{deadpool::Pool, AsyncDieselConnectionManager, ManagerConfig},
    AsyncPgConnection, RunQueryDsl,
};
use uuid::Uuid;

use super::{unconfirmed, CredentialStore, RegistryEntry, StoreError, UserData};
use crate::auth::jwt::TokenPair;
use crate::models::{NewRegistryRow, NewUser, RegistryRow, UserRow};

pub type DbPool = Pool<AsyncPgConnection>;

async fn establish_tls_connection(config: String) -> diesel::ConnectionResult<AsyncPgConnection> {
    // Set up rustls TLS configuration
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

    let (client, connection) = tokio_postgres::connect(&config, tls)
        .await
        .map_err(|e| diesel::ConnectionError::BadConnection(e.to_string()))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("Connection error: {}", e);
        }
    });

    AsyncPgConnection::try_from(client).await
}

/// Build the connection pool. TLS is used unless the URL says `sslmode=disable`.
pub fn establish_connection_pool(database_url: &str) -> anyhow::Result<DbPool> {
    let config = if database_url.contains("sslmode=disable") {
        AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url)
    } else {
        let mut manager_config = ManagerConfig::default();
        manager_config.custom_setup =
            Box::new(|url| Box::pin(establish_tls_connection(url.to_string())));

        AsyncDieselConnectionManager::<AsyncPgConnection>::new_with_config(
            database_url,
            manager_config,
        )
    };

    let pool = Pool::builder(config).build()?;

    Ok(pool)
}

pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn conn(
        &self,
    ) -> Result<
        diesel_async::pooled_connection::deadpool::Object<AsyncPgConnection>,
        StoreError,
    > {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn create_user(&self, user: &UserData) -> Result<(), StoreError> {
        use crate::schema::users::dsl::*;

        let mut conn = self.conn().await?;

        let inserted = diesel::insert_into(users)
            .values(NewUser {
                email: &user.email,
                password_hash: &user.password_hash,
            })
            .on_conflict_do_nothing()
            .execute(&mut conn)
            .await?;

        if inserted == 0 {
            return Err(StoreError::AlreadyExists);
        }

        Ok(())
    }

    async fn get_user_by_email(&self, user_email: &str) -> Result<Option<UserData>, StoreError> {
        use crate::schema::users::dsl::*;

        let mut conn = self.conn().await?;

        let row = users
            .filter(email.eq(user_email))
            .select(UserRow::as_select())
            .first::<UserRow>(&mut conn)
            .await
            .optional()?;

        Ok(row.map(Into::into))
    }

    async fn create_token_entries(&self, pair: &TokenPair) -> Result<(), StoreError> {
        use crate::schema::token_registry::dsl::*;

        let now = Utc::now().timestamp();
        let entries: Vec<RegistryEntry> = RegistryEntry::for_pair(pair)
            .into_iter()
            .filter(|entry| entry.is_live_at(now))
            .collect();

        if entries.is_empty() {
            return Ok(());
        }

        let rows = entries
            .iter()
            .map(NewRegistryRow::from_entry)
            .collect::<Result<Vec<_>, _>>()?;

        let mut conn = self.conn().await?;
        diesel::insert_into(token_registry)
            .values(&rows)
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    async fn delete_token_entries(&self, ids: &[Uuid]) -> Result<(), StoreError> {
        use crate::schema::token_registry::dsl::*;

        let mut conn = self.conn().await?;

        let deleted: Vec<Uuid> = diesel::delete(
            token_registry
                .filter(token_id.eq_any(ids.to_vec()))
                .filter(expires_at.gt(Utc::now())),
        )
        .returning(token_id)
        .get_results(&mut conn)
        .await?;

        if deleted.len() != ids.len() {
            return Err(StoreError::PartialDelete {
                requested: ids.len(),
                missing: unconfirmed(ids, &deleted),
            });
        }

        Ok(())
    }

    async fn is_token_live(&self, id: Uuid) -> Result<bool, StoreError> {
        use crate::schema::token_registry::dsl::*;

        let mut conn = self.conn().await?;

        let live = diesel::select(diesel::dsl::exists(
            token_registry
                .filter(token_id.eq(id))
                .filter(expires_at.gt(Utc::now())),
        ))
        .get_result::<bool>(&mut conn)
        .await?;

        Ok(live)
    }

    async fn token_entry(&self, id: Uuid) -> Result<Option<RegistryEntry>, StoreError> {
        use crate::schema::token_registry::dsl::*;

        let mut conn = self.conn().await?;

        let row = token_registry
            .filter(token_id.eq(id))
            .filter(expires_at.gt(Utc::now()))
            .select(RegistryRow::as_select())
            .first::<RegistryRow>(&mut conn)
            .await
            .optional()?;

        row.map(RegistryEntry::try_from).transpose()
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        use crate::schema::token_registry::dsl::*;

        let mut conn = self.conn().await?;

        let purged = diesel::delete(token_registry.filter(expires_at.le(Utc::now())))
            .execute(&mut conn)
            .await?;

        Ok(purged as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        diesel::sql_query("SELECT 1").execute(&mut conn).await?;
        Ok(())
    }
}
