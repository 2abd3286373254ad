//! Trust group storage.

use sqlx_core::query_as::query_as;

use ltilaunch::types::ConsumerGroup;

use crate::{PgPool, StorageResult, conflict_or_database};

/// Trust group storage operations.
pub struct GroupStorage<'a> {
    pool: &'a PgPool,
}

impl<'a> GroupStorage<'a> {
    /// Create a new group storage with a connection pool reference.
    #[must_use]
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Find a group by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_by_name(&self, name: &str) -> StorageResult<Option<ConsumerGroup>> {
        let row: Option<(i64, String)> =
            query_as("SELECT id, name FROM lti_consumer_groups WHERE name = $1")
                .bind(name)
                .fetch_optional(self.pool)
                .await?;
        Ok(row.map(|(id, name)| ConsumerGroup { id, name }))
    }

    /// Create a group.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the name is taken.
    pub async fn create(&self, name: &str) -> StorageResult<ConsumerGroup> {
        let (id, name): (i64, String) =
            query_as("INSERT INTO lti_consumer_groups (name) VALUES ($1) RETURNING id, name")
                .bind(name)
                .fetch_one(self.pool)
                .await
                .map_err(|e| conflict_or_database(e, || format!("group '{name}' already exists")))?;
        Ok(ConsumerGroup { id, name })
    }
}
