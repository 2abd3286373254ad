//! Tool provider registrations.

use sqlx_core::query_as::query_as;

use ltilaunch::types::{ToolProvider, Visibility};

use crate::{PgPool, StorageError, StorageResult, conflict_or_database};

type ProviderTuple = (String, String, String, String, String, String);

fn from_tuple(row: ProviderTuple) -> StorageResult<ToolProvider> {
    let visibility: Visibility = row.5.parse().map_err(StorageError::invalid_input)?;
    Ok(ToolProvider {
        name: row.0,
        display_name: row.1,
        description: row.2,
        icon_url: row.3,
        launch_path: row.4,
        visibility,
    })
}

/// Tool provider storage operations.
pub struct ProviderStorage<'a> {
    pool: &'a PgPool,
}

impl<'a> ProviderStorage<'a> {
    /// Create a new provider storage with a connection pool reference.
    #[must_use]
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Find a provider by slug.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the stored visibility is
    /// unknown.
    pub async fn find_by_name(&self, name: &str) -> StorageResult<Option<ToolProvider>> {
        let row: Option<ProviderTuple> = query_as(
            r#"
            SELECT name, display_name, description, icon_url, launch_path, visibility
            FROM lti_tool_providers
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(self.pool)
        .await?;
        row.map(from_tuple).transpose()
    }

    /// Register a provider.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the slug is taken.
    pub async fn create(&self, provider: &ToolProvider) -> StorageResult<()> {
        sqlx_core::query::query(
            r#"
            INSERT INTO lti_tool_providers
                (name, display_name, description, icon_url, launch_path, visibility)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&provider.name)
        .bind(&provider.display_name)
        .bind(&provider.description)
        .bind(&provider.icon_url)
        .bind(&provider.launch_path)
        .bind(provider.visibility.as_str())
        .execute(self.pool)
        .await
        .map_err(|e| {
            conflict_or_database(e, || format!("provider '{}' already exists", provider.name))
        })?;
        Ok(())
    }
}
