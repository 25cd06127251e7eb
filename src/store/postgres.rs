//! PostgreSQL backed [`ConfigStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{Pool, Postgres};

use crate::directory::{ActiveDirectoryConfig, DirectoryConfig, ObjectMeta};
use crate::store::{ConfigStore, Result, StoreError};

#[derive(sqlx::FromRow)]
struct AuthConfigRow {
    name: String,
    api_version: String,
    kind: String,
    #[sqlx(rename = "type")]
    config_type: String,
    resource_version: i64,
    spec: Json<DirectoryConfig>,
    created_at: DateTime<Utc>,
}

impl From<AuthConfigRow> for ActiveDirectoryConfig {
    fn from(row: AuthConfigRow) -> Self {
        Self {
            api_version: row.api_version,
            kind: row.kind,
            r#type: row.config_type,
            metadata: ObjectMeta {
                name: row.name,
                resource_version: row.resource_version,
                created_at: row.created_at,
            },
            spec: row.spec.0,
        }
    }
}

#[derive(Clone)]
pub struct PostgresConfigStore {
    pool: Pool<Postgres>,
}

impl PostgresConfigStore {
    /// Create a new [`PostgresConfigStore`].
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConfigStore for PostgresConfigStore {
    async fn get(&self, name: &str) -> Result<Option<ActiveDirectoryConfig>> {
        let row = sqlx::query_as::<_, AuthConfigRow>(
            r#"SELECT name, api_version, kind, "type", resource_version, spec, created_at
                FROM auth_configs WHERE name = $1"#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn update(
        &self,
        name: &str,
        record: &ActiveDirectoryConfig,
    ) -> Result<ActiveDirectoryConfig> {
        let expected = record.metadata.resource_version;

        let row = sqlx::query_as::<_, AuthConfigRow>(
            r#"UPDATE auth_configs
                SET api_version = $1, kind = $2, "type" = $3, spec = $4,
                    resource_version = resource_version + 1, updated_at = NOW()
                WHERE name = $5 AND resource_version = $6
                RETURNING name, api_version, kind, "type", resource_version, spec, created_at"#,
        )
        .bind(&record.api_version)
        .bind(&record.kind)
        .bind(&record.r#type)
        .bind(Json(&record.spec))
        .bind(name)
        .bind(expected)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.into()),
            None if self.get(name).await?.is_some() => Err(StoreError::Conflict {
                name: name.to_owned(),
                expected,
            }),
            None => Err(StoreError::NotFound(name.to_owned())),
        }
    }
}
