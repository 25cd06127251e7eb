//! Storage of provider configuration records.
mod postgres;

pub use postgres::PostgresConfigStore;

use async_trait::async_trait;

use crate::directory::{ActiveDirectoryConfig, DirectoryConfig};

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no stored configuration named {0:?}")]
    NotFound(String),
    #[error("configuration {name:?} was modified concurrently (expected version {expected})")]
    Conflict { name: String, expected: i64 },
    #[error("SQL request failed: {0}")]
    Sql(#[from] sqlx::Error),
    #[error("stored configuration is not valid: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Versioned object store holding one record per provider name.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Read a record and its version metadata.
    async fn get(&self, name: &str) -> Result<Option<ActiveDirectoryConfig>>;

    /// Replace an existing record.
    ///
    /// `record.metadata.resource_version` must match the stored version,
    /// otherwise [`StoreError::Conflict`] is returned. Returns the record as
    /// stored, with its new version.
    async fn update(
        &self,
        name: &str,
        record: &ActiveDirectoryConfig,
    ) -> Result<ActiveDirectoryConfig>;
}

/// Commits a proven configuration over the pre-existing record.
pub struct ConfigPersister<'a> {
    store: &'a dyn ConfigStore,
    name: &'a str,
}

impl<'a> ConfigPersister<'a> {
    /// Create a new [`ConfigPersister`] for provider `name`.
    pub fn new(store: &'a dyn ConfigStore, name: &'a str) -> Self {
        Self { store, name }
    }

    /// Update the stored record in place. Never inserts a new one.
    pub async fn apply(&self, config: DirectoryConfig) -> Result<ActiveDirectoryConfig> {
        let stored = self
            .store
            .get(self.name)
            .await?
            .ok_or_else(|| StoreError::NotFound(self.name.to_owned()))?;

        let record = ActiveDirectoryConfig::from_stored(&stored, config);

        tracing::debug!(
            name = %self.name,
            version = record.metadata.resource_version,
            "updating activedirectory config"
        );

        self.store.update(self.name, &record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{API_VERSION, CONFIG_TYPE, KIND, PROVIDER_NAME};
    use crate::memory::MemoryConfigStore;

    fn proposal() -> DirectoryConfig {
        DirectoryConfig {
            servers: vec!["dc1.example.com".into()],
            user_search_base: "dc=example,dc=com".into(),
            enabled: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_apply_updates_in_place() {
        let store = MemoryConfigStore::registered(PROVIDER_NAME);
        let before = store.get(PROVIDER_NAME).await.unwrap().unwrap();

        let persister = ConfigPersister::new(&store, PROVIDER_NAME);
        let saved = persister.apply(proposal()).await.unwrap();

        assert_eq!(saved.metadata.name, before.metadata.name);
        assert_eq!(saved.metadata.created_at, before.metadata.created_at);
        assert_eq!(saved.metadata.resource_version, before.metadata.resource_version + 1);
        assert_eq!(saved.api_version, API_VERSION);
        assert_eq!(saved.kind, KIND);
        assert_eq!(saved.r#type, CONFIG_TYPE);
        assert!(saved.spec.enabled);
        assert_eq!(store.len().await, 1);

        let again = persister.apply(proposal()).await.unwrap();
        assert_eq!(again.metadata.name, before.metadata.name);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_apply_requires_existing_record() {
        let store = MemoryConfigStore::default();
        let err = ConfigPersister::new(&store, PROVIDER_NAME)
            .apply(proposal())
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::NotFound(name) if name == PROVIDER_NAME));
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let store = MemoryConfigStore::registered(PROVIDER_NAME);
        let stale = store.get(PROVIDER_NAME).await.unwrap().unwrap();

        ConfigPersister::new(&store, PROVIDER_NAME)
            .apply(proposal())
            .await
            .unwrap();

        let err = store.update(PROVIDER_NAME, &stale).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }
}
