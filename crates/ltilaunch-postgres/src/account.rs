//! Local account storage.

use sqlx_core::query_as::query_as;
use time::OffsetDateTime;
use uuid::Uuid;

use ltilaunch::types::Account;

use crate::{PgPool, StorageResult, conflict_or_database};

/// Account storage operations.
pub struct AccountStorage<'a> {
    pool: &'a PgPool,
}

impl<'a> AccountStorage<'a> {
    /// Create a new account storage with a connection pool reference.
    #[must_use]
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Find an account by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_by_id(&self, id: Uuid) -> StorageResult<Option<Account>> {
        let row: Option<(Uuid, String, OffsetDateTime)> =
            query_as("SELECT id, username, created_at FROM accounts WHERE id = $1")
                .bind(id)
                .fetch_optional(self.pool)
                .await?;
        Ok(row.map(|(id, username, created_at)| Account {
            id,
            username,
            created_at,
        }))
    }

    /// Insert an account.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the id already exists.
    pub async fn create(&self, account: &Account) -> StorageResult<()> {
        sqlx_core::query::query(
            "INSERT INTO accounts (id, username, created_at) VALUES ($1, $2, $3)",
        )
        .bind(account.id)
        .bind(&account.username)
        .bind(account.created_at)
        .execute(self.pool)
        .await
        .map_err(|e| conflict_or_database(e, || format!("account {} already exists", account.id)))?;
        Ok(())
    }
}
