// Database models for Diesel
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::auth::jwt::TokenClass;
use crate::store::{RegistryEntry, StoreError, UserData};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UserRow {
    pub email: String,
    pub password_hash: String,
    #[allow(dead_code)]
    pub created_at: DateTime<Utc>,
}

impl From<UserRow> for UserData {
    fn from(row: UserRow) -> Self {
        UserData {
            email: row.email,
            password_hash: row.password_hash,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::users)]
pub struct NewUser<'a> {
    pub email: &'a str,
    pub password_hash: &'a str,
}

/// Database representation of token_registry
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::token_registry)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RegistryRow {
    pub token_id: Uuid,
    pub subject: String,
    pub token_class: String, // "access" | "refresh"
    pub pair_id: Uuid,
    pub expires_at: DateTime<Utc>,
    #[allow(dead_code)]
    pub created_at: DateTime<Utc>,
}

impl TryFrom<RegistryRow> for RegistryEntry {
    type Error = StoreError;

    fn try_from(row: RegistryRow) -> Result<Self, Self::Error> {
        let class: TokenClass = row
            .token_class
            .parse()
            .map_err(|e| StoreError::Backend(format!("Corrupt registry row {}: {}", row.token_id, e)))?;

        Ok(RegistryEntry {
            token_id: row.token_id,
            subject: row.subject,
            class,
            pair_id: row.pair_id,
            expires_at: row.expires_at.timestamp(),
        })
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::token_registry)]
pub struct NewRegistryRow<'a> {
    pub token_id: Uuid,
    pub subject: &'a str,
    pub token_class: &'a str,
    pub pair_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

impl<'a> NewRegistryRow<'a> {
    pub fn from_entry(entry: &'a RegistryEntry) -> Result<Self, StoreError> {
        let expires_at = DateTime::<Utc>::from_timestamp(entry.expires_at, 0).ok_or_else(|| {
            StoreError::Backend(format!("Expiry out of range: {}", entry.expires_at))
        })?;

        Ok(Self {
            token_id: entry.token_id,
            subject: &entry.subject,
            token_class: entry.class.as_str(),
            pair_id: entry.pair_id,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(class: &str) -> RegistryRow {
        RegistryRow {
            token_id: Uuid::new_v4(),
            subject: "a@b.com".to_string(),
            token_class: class.to_string(),
            pair_id: Uuid::new_v4(),
            expires_at: DateTime::<Utc>::from_timestamp(1_900, 0).unwrap(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_registry_row_into_entry() {
        let row = row("refresh");
        let token_id = row.token_id;
        let entry = RegistryEntry::try_from(row).unwrap();

        assert_eq!(entry.token_id, token_id);
        assert_eq!(entry.class, TokenClass::Refresh);
        assert_eq!(entry.expires_at, 1_900);
    }

    #[test]
    fn test_corrupt_class_is_backend_error() {
        assert!(matches!(
            RegistryEntry::try_from(row("bogus")),
            Err(StoreError::Backend(_))
        ));
    }

    #[test]
    fn test_new_row_from_entry() {
        let entry = RegistryEntry::try_from(row("access")).unwrap();
        let new_row = NewRegistryRow::from_entry(&entry).unwrap();

        assert_eq!(new_row.token_class, "access");
        assert_eq!(new_row.expires_at.timestamp(), 1_900);
    }
}
