//! Federated identity storage.
//!
//! One row per (caller, external user id), enforced by a unique constraint.
//! The last launch parameters are kept as a JSONB object so that matchers
//! can filter on a single key.

use sqlx_core::query_as::query_as;
use time::OffsetDateTime;
use uuid::Uuid;

use ltilaunch::IdentityFilter;
use ltilaunch::types::{Account, LaunchParams, LtiUser, NewLtiUser};

use crate::{PgPool, StorageError, StorageResult, conflict_or_database};

type LtiUserTuple = (i64, Uuid, i64, String, serde_json::Value, OffsetDateTime);

const LTI_USER_COLUMNS: &str =
    "id, account_id, consumer_id, lti_user_id, last_launch_parameters, last_launch_time";

fn from_tuple(row: LtiUserTuple) -> StorageResult<LtiUser> {
    let last_launch_parameters: LaunchParams = serde_json::from_value(row.4)?;
    Ok(LtiUser {
        id: row.0,
        account_id: row.1,
        consumer_id: row.2,
        lti_user_id: row.3,
        last_launch_parameters,
        last_launch_time: row.5,
    })
}

fn duplicate_identity(identity: &NewLtiUser) -> impl FnOnce() -> String + '_ {
    move || {
        format!(
            "identity for consumer {} and user '{}' already exists",
            identity.consumer_id, identity.lti_user_id
        )
    }
}

/// Identity storage operations.
pub struct LtiUserStorage<'a> {
    pool: &'a PgPool,
}

impl<'a> LtiUserStorage<'a> {
    /// Create a new identity storage with a connection pool reference.
    #[must_use]
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Find an identity by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the stored parameters do not
    /// decode.
    pub async fn find_by_id(&self, id: i64) -> StorageResult<Option<LtiUser>> {
        let sql = format!("SELECT {LTI_USER_COLUMNS} FROM lti_users WHERE id = $1");
        let row: Option<LtiUserTuple> = query_as(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        row.map(from_tuple).transpose()
    }

    /// Find the identity of `lti_user_id` under `consumer_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find(
        &self,
        consumer_id: i64,
        lti_user_id: &str,
    ) -> StorageResult<Option<LtiUser>> {
        let sql = format!(
            "SELECT {LTI_USER_COLUMNS} FROM lti_users WHERE consumer_id = $1 AND lti_user_id = $2"
        );
        let row: Option<LtiUserTuple> = query_as(&sql)
            .bind(consumer_id)
            .bind(lti_user_id)
            .fetch_optional(self.pool)
            .await?;
        row.map(from_tuple).transpose()
    }

    /// Identities owned by any of `consumer_ids` that pass `filter`, by
    /// ascending id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn filter(
        &self,
        consumer_ids: &[i64],
        filter: &IdentityFilter,
    ) -> StorageResult<Vec<LtiUser>> {
        let rows: Vec<LtiUserTuple> = match filter {
            IdentityFilter::LtiUserId(lti_user_id) => {
                let sql = format!(
                    r#"
                    SELECT {LTI_USER_COLUMNS} FROM lti_users
                    WHERE consumer_id = ANY($1) AND lti_user_id = $2
                    ORDER BY id
                    "#
                );
                query_as(&sql)
                    .bind(consumer_ids)
                    .bind(lti_user_id)
                    .fetch_all(self.pool)
                    .await?
            }
            IdentityFilter::LaunchParam { key, value } => {
                let sql = format!(
                    r#"
                    SELECT {LTI_USER_COLUMNS} FROM lti_users
                    WHERE consumer_id = ANY($1) AND last_launch_parameters ->> $2 = $3
                    ORDER BY id
                    "#
                );
                query_as(&sql)
                    .bind(consumer_ids)
                    .bind(key)
                    .bind(value)
                    .fetch_all(self.pool)
                    .await?
            }
        };
        rows.into_iter().map(from_tuple).collect()
    }

    /// Insert an identity linked to an existing account.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the (caller, user id) pair exists.
    pub async fn create(&self, identity: &NewLtiUser) -> StorageResult<LtiUser> {
        let params = serde_json::to_value(&identity.last_launch_parameters)?;
        let sql = insert_sql();
        let row: LtiUserTuple = query_as(&sql)
            .bind(identity.account_id)
            .bind(identity.consumer_id)
            .bind(&identity.lti_user_id)
            .bind(&params)
            .bind(identity.last_launch_time)
            .fetch_one(self.pool)
            .await
            .map_err(|e| conflict_or_database(e, duplicate_identity(identity)))?;
        from_tuple(row)
    }

    /// Insert `account` and an identity linked to it in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the (caller, user id) pair exists;
    /// the account insert is rolled back with it.
    pub async fn create_with_account(
        &self,
        account: &Account,
        identity: &NewLtiUser,
    ) -> StorageResult<LtiUser> {
        let params = serde_json::to_value(&identity.last_launch_parameters)?;
        let mut tx = self.pool.begin().await?;

        sqlx_core::query::query(
            "INSERT INTO accounts (id, username, created_at) VALUES ($1, $2, $3)",
        )
        .bind(account.id)
        .bind(&account.username)
        .bind(account.created_at)
        .execute(&mut *tx)
        .await?;

        let sql = insert_sql();
        let row: LtiUserTuple = query_as(&sql)
            .bind(account.id)
            .bind(identity.consumer_id)
            .bind(&identity.lti_user_id)
            .bind(&params)
            .bind(identity.last_launch_time)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| conflict_or_database(e, duplicate_identity(identity)))?;

        tx.commit().await?;
        from_tuple(row)
    }

    /// Replace the stored launch parameters and time.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the identity does not exist.
    pub async fn record_launch(
        &self,
        id: i64,
        params: &LaunchParams,
        at: OffsetDateTime,
    ) -> StorageResult<LtiUser> {
        let params = serde_json::to_value(params)?;
        let sql = format!(
            r#"
            UPDATE lti_users
            SET last_launch_parameters = $2, last_launch_time = $3
            WHERE id = $1
            RETURNING {LTI_USER_COLUMNS}
            "#
        );
        let row: Option<LtiUserTuple> = query_as(&sql)
            .bind(id)
            .bind(&params)
            .bind(at)
            .fetch_optional(self.pool)
            .await?;
        let row = row.ok_or_else(|| StorageError::not_found(format!("identity {id}")))?;
        from_tuple(row)
    }
}

fn insert_sql() -> String {
    format!(
        r#"
        INSERT INTO lti_users
            (account_id, consumer_id, lti_user_id, last_launch_parameters, last_launch_time)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {LTI_USER_COLUMNS}
        "#
    )
}
