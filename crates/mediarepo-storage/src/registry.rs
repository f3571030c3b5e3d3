//! Per-process datastore cache.

use crate::factory::create_datastore;
use crate::traits::{Datastore, StorageError, StorageResult};
use crate::DatastoreRef;
use mediarepo_core::DatastoreConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Lookup-or-create cache of datastore instances, keyed by datastore id.
///
/// The lock is held across creation, so concurrent first uses of an id build
/// exactly one backend.
pub struct DatastoreRegistry {
    configs: HashMap<String, DatastoreConfig>,
    default_expiry: Duration,
    instances: Mutex<HashMap<String, Arc<DatastoreRef>>>,
}

impl DatastoreRegistry {
    pub fn new(configs: impl IntoIterator<Item = DatastoreConfig>, default_expiry: Duration) -> Self {
        Self {
            configs: configs.into_iter().map(|c| (c.id.clone(), c)).collect(),
            default_expiry,
            instances: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self, id: &str) -> Option<&DatastoreConfig> {
        self.configs.get(id)
    }

    pub async fn get(&self, id: &str) -> StorageResult<Arc<DatastoreRef>> {
        let mut instances = self.instances.lock().await;
        if let Some(existing) = instances.get(id) {
            return Ok(existing.clone());
        }

        let config = self
            .configs
            .get(id)
            .ok_or_else(|| StorageError::ConfigError(format!("Unknown datastore {}", id)))?;

        let backend = create_datastore(config, self.default_expiry).await?;
        let datastore = Arc::new(DatastoreRef::new(config.clone(), backend));
        instances.insert(id.to_string(), datastore.clone());

        tracing::info!(datastore_id = %id, kind = %config.kind, "Datastore initialised");
        Ok(datastore)
    }

    /// Install a prebuilt backend under `config.id`, replacing any cached instance.
    pub async fn register(&self, config: DatastoreConfig, backend: Arc<dyn Datastore>) -> Arc<DatastoreRef> {
        let datastore = Arc::new(DatastoreRef::new(config, backend));
        self.instances
            .lock()
            .await
            .insert(datastore.id().to_string(), datastore.clone());
        datastore
    }
}

#[cfg(all(test, feature = "storage-file"))]
mod tests {
    use super::*;
    use mediarepo_core::constants::options;
    use mediarepo_core::DatastoreKind;

    #[tokio::test]
    async fn concurrent_first_use_builds_one_instance() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(DatastoreRegistry::new(
            vec![DatastoreConfig::new("files", DatastoreKind::File)
                .with_option(options::PATH, dir.path().to_string_lossy())],
            Duration::from_secs(60),
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.get("files").await.unwrap() })
            })
            .collect();

        let mut instances = Vec::new();
        for handle in handles {
            instances.push(handle.await.unwrap());
        }
        assert!(instances.iter().all(|i| Arc::ptr_eq(i, &instances[0])));
    }

    #[tokio::test]
    async fn unknown_and_misconfigured_datastores_fail() {
        let registry = DatastoreRegistry::new(
            vec![
                DatastoreConfig::new("files", DatastoreKind::File),
                DatastoreConfig::new("s3main", DatastoreKind::S3),
            ],
            Duration::from_secs(60),
        );

        assert!(matches!(registry.get("nope").await, Err(StorageError::ConfigError(_))));
        assert!(matches!(registry.get("files").await, Err(StorageError::ConfigError(_))));
        assert!(matches!(registry.get("s3main").await, Err(StorageError::ConfigError(_))));
    }
}
