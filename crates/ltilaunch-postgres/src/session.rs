//! Launch session storage.
//!
//! Sessions are keyed by their opaque token. Expired rows are left in place
//! until a lookup or the next launch deletes them.

use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;
use uuid::Uuid;

use ltilaunch::types::LaunchSession;

use crate::{PgPool, StorageResult, conflict_or_database};

/// Launch session storage operations.
pub struct SessionStorage<'a> {
    pool: &'a PgPool,
}

impl<'a> SessionStorage<'a> {
    /// Create a new session storage with a connection pool reference.
    #[must_use]
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Insert a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn create(&self, session: &LaunchSession) -> StorageResult<()> {
        query(
            r#"
            INSERT INTO launch_sessions (token, account_id, identity_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&session.token)
        .bind(session.account_id)
        .bind(session.identity_id)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(self.pool)
        .await
        .map_err(|e| conflict_or_database(e, || "session token collision".to_string()))?;
        Ok(())
    }

    /// Find a session by token, expired or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_by_token(&self, token: &str) -> StorageResult<Option<LaunchSession>> {
        let row: Option<(String, Uuid, i64, OffsetDateTime, OffsetDateTime)> = query_as(
            r#"
            SELECT token, account_id, identity_id, created_at, expires_at
            FROM launch_sessions
            WHERE token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(
            |(token, account_id, identity_id, created_at, expires_at)| LaunchSession {
                token,
                account_id,
                identity_id,
                created_at,
                expires_at,
            },
        ))
    }

    /// Delete a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete(&self, token: &str) -> StorageResult<()> {
        query("DELETE FROM launch_sessions WHERE token = $1")
            .bind(token)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Delete every expired session, returning the number removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete_expired(&self) -> StorageResult<u64> {
        let result = query("DELETE FROM launch_sessions WHERE expires_at <= NOW()")
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
