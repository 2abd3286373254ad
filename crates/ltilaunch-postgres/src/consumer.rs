//! Trusted caller storage.
//!
//! Callers live in `lti_tool_consumers`. The rolling nonce history is a
//! `TEXT[]` column updated under a row lock so that concurrent launches from
//! the same caller never lose an insert.

use sqlx_core::query_as::query_as;
use tracing::debug;

use ltilaunch::NonceHistory;
use ltilaunch::types::{NewToolConsumer, ToolConsumer};

use crate::{PgPool, StorageError, StorageResult, conflict_or_database};

type ConsumerTuple = (
    i64,
    String,
    String,
    String,
    String,
    Option<String>,
    bool,
    Vec<String>,
    Option<i64>,
    Option<String>,
);

const CONSUMER_COLUMNS: &str = "id, name, description, consumer_key, consumer_secret, \
     instance_guid, match_guid_and_consumer, recent_nonces, group_id, matcher";

fn from_tuple(row: ConsumerTuple) -> ToolConsumer {
    ToolConsumer {
        id: row.0,
        name: row.1,
        description: row.2,
        consumer_key: row.3,
        consumer_secret: row.4,
        instance_guid: row.5,
        match_guid_and_consumer: row.6,
        recent_nonces: row.7,
        group_id: row.8,
        matcher: row.9,
    }
}

/// Caller storage operations.
pub struct ConsumerStorage<'a> {
    pool: &'a PgPool,
}

impl<'a> ConsumerStorage<'a> {
    /// Create a new consumer storage with a connection pool reference.
    #[must_use]
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Find a caller by consumer key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_by_key(&self, consumer_key: &str) -> StorageResult<Option<ToolConsumer>> {
        let sql =
            format!("SELECT {CONSUMER_COLUMNS} FROM lti_tool_consumers WHERE consumer_key = $1");
        let row: Option<ConsumerTuple> = query_as(&sql)
            .bind(consumer_key)
            .fetch_optional(self.pool)
            .await?;
        Ok(row.map(from_tuple))
    }

    /// Find a caller by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_by_id(&self, id: i64) -> StorageResult<Option<ToolConsumer>> {
        let sql = format!("SELECT {CONSUMER_COLUMNS} FROM lti_tool_consumers WHERE id = $1");
        let row: Option<ConsumerTuple> = query_as(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        Ok(row.map(from_tuple))
    }

    /// List the members of a trust group, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list_by_group(&self, group_id: i64) -> StorageResult<Vec<ToolConsumer>> {
        let sql = format!(
            "SELECT {CONSUMER_COLUMNS} FROM lti_tool_consumers WHERE group_id = $1 ORDER BY id"
        );
        let rows: Vec<ConsumerTuple> = query_as(&sql)
            .bind(group_id)
            .fetch_all(self.pool)
            .await?;
        Ok(rows.into_iter().map(from_tuple).collect())
    }

    /// Register a caller.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the consumer key is taken.
    pub async fn create(&self, consumer: NewToolConsumer) -> StorageResult<ToolConsumer> {
        let sql = format!(
            r#"
            INSERT INTO lti_tool_consumers
                (name, description, consumer_key, consumer_secret, instance_guid,
                 match_guid_and_consumer, group_id, matcher)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {CONSUMER_COLUMNS}
            "#
        );
        let row: ConsumerTuple = query_as(&sql)
            .bind(&consumer.name)
            .bind(&consumer.description)
            .bind(&consumer.consumer_key)
            .bind(&consumer.consumer_secret)
            .bind(&consumer.instance_guid)
            .bind(consumer.match_guid_and_consumer)
            .bind(consumer.group_id)
            .bind(&consumer.matcher)
            .fetch_one(self.pool)
            .await
            .map_err(|e| {
                conflict_or_database(e, || {
                    format!("consumer key '{}' already exists", consumer.consumer_key)
                })
            })?;
        Ok(from_tuple(row))
    }

    /// Push `nonce` onto the caller's history and return the previous
    /// history.
    ///
    /// Runs in one transaction holding `FOR UPDATE` on the caller's row.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the caller does not exist.
    pub async fn record_nonce(
        &self,
        consumer_id: i64,
        nonce: &str,
        capacity: usize,
    ) -> StorageResult<NonceHistory> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(Vec<String>,)> = query_as(
            "SELECT recent_nonces FROM lti_tool_consumers WHERE id = $1 FOR UPDATE",
        )
        .bind(consumer_id)
        .fetch_optional(&mut *tx)
        .await?;
        let (stored,) =
            row.ok_or_else(|| StorageError::not_found(format!("consumer {consumer_id}")))?;

        let previous = NonceHistory::from_vec(stored);
        let mut updated = previous.clone();
        updated.push(nonce, capacity);

        sqlx_core::query::query("UPDATE lti_tool_consumers SET recent_nonces = $2 WHERE id = $1")
            .bind(consumer_id)
            .bind(updated.into_vec())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(consumer_id, history = previous.len(), "Recorded nonce");
        Ok(previous)
    }
}
