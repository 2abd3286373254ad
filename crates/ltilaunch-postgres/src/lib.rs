//! PostgreSQL storage backend for ltilaunch.
//!
//! Provides persistent storage for:
//!
//! - Trusted callers and their rolling nonce history
//! - Trust groups
//! - Local accounts
//! - Federated identities with their last launch parameters
//! - Launch sessions
//! - Tool provider registrations
//!
//! The schema is created by the embedded migrations in [`migrations`].
//!
//! # Example
//!
//! ```ignore
//! use ltilaunch::LtiStores;
//! use ltilaunch_postgres::PostgresLtiStorage;
//!
//! let storage = PostgresLtiStorage::connect("postgres://localhost/ltilaunch").await?;
//! storage.migrate().await?;
//!
//! let stores = LtiStores::from_backend(std::sync::Arc::new(storage));
//! ```

pub mod account;
pub mod consumer;
pub mod group;
pub mod lti_user;
pub mod migrations;
pub mod pool;
pub mod provider;
pub mod session;
pub mod storage_adapters;

use std::sync::Arc;

use sqlx_core::pool::Pool;
use sqlx_postgres::Postgres;

use ltilaunch::LaunchError;

/// PostgreSQL connection pool type alias.
pub type PgPool = Pool<Postgres>;

pub use account::AccountStorage;
pub use consumer::ConsumerStorage;
pub use group::GroupStorage;
pub use lti_user::LtiUserStorage;
pub use pool::{PostgresConfig, create_pool};
pub use provider::ProviderStorage;
pub use session::SessionStorage;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during launch storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx_core::Error),

    /// Requested row was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Row already exists (unique constraint).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Serialization/deserialization of a JSONB column failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input data or an unreadable stored value.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Applying the schema migrations failed.
    #[error("Migration error: {0}")]
    Migration(String),
}

impl StorageError {
    /// Create a `NotFound` error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// Create a `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Create an `InvalidInput` error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Returns `true` if this is a not found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns `true` if this is a conflict error.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Returns `true` if this is a database error.
    #[must_use]
    pub fn is_database_error(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

impl From<StorageError> for LaunchError {
    fn from(err: StorageError) -> Self {
        LaunchError::storage(err.to_string())
    }
}

/// Maps a unique violation to `Conflict`, everything else to `Database`.
pub(crate) fn conflict_or_database(
    err: sqlx_core::Error,
    what: impl FnOnce() -> String,
) -> StorageError {
    if let sqlx_core::Error::Database(ref db_err) = err
        && db_err.is_unique_violation()
    {
        return StorageError::conflict(what());
    }
    StorageError::from(err)
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

// =============================================================================
// PostgreSQL Launch Storage
// =============================================================================

/// PostgreSQL storage backend for launch data.
///
/// Holds a connection pool and hands out borrowed per-table storages. The
/// `ltilaunch` storage traits are implemented in [`storage_adapters`], so an
/// `Arc<PostgresLtiStorage>` can back an [`ltilaunch::LtiStores`] bundle.
#[derive(Debug, Clone)]
pub struct PostgresLtiStorage {
    pool: Arc<PgPool>,
}

impl PostgresLtiStorage {
    /// Create new storage with an existing connection pool.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create new storage by connecting to the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        use sqlx_core::pool::PoolOptions;
        let pool = PoolOptions::<Postgres>::new().connect(database_url).await?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// Applies pending schema migrations.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Migration` if a migration fails.
    pub async fn migrate(&self) -> StorageResult<()> {
        migrations::run(&self.pool).await
    }

    /// Get a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Get consumer storage operations.
    #[must_use]
    pub fn consumers(&self) -> ConsumerStorage<'_> {
        ConsumerStorage::new(&self.pool)
    }

    /// Get trust group storage operations.
    #[must_use]
    pub fn groups(&self) -> GroupStorage<'_> {
        GroupStorage::new(&self.pool)
    }

    /// Get account storage operations.
    #[must_use]
    pub fn accounts(&self) -> AccountStorage<'_> {
        AccountStorage::new(&self.pool)
    }

    /// Get identity storage operations.
    #[must_use]
    pub fn lti_users(&self) -> LtiUserStorage<'_> {
        LtiUserStorage::new(&self.pool)
    }

    /// Get launch session storage operations.
    #[must_use]
    pub fn sessions(&self) -> SessionStorage<'_> {
        SessionStorage::new(&self.pool)
    }

    /// Get tool provider storage operations.
    #[must_use]
    pub fn providers(&self) -> ProviderStorage<'_> {
        ProviderStorage::new(&self.pool)
    }
}
