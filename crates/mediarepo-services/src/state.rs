use std::sync::Arc;

use mediarepo_core::Config;
use mediarepo_db::MediaStore;
use mediarepo_storage::DatastoreRegistry;

use crate::policy::{ConfiguredUploadPolicy, UploadPolicy};
use crate::upload_waiter::UploadWaitRegistry;

/// Shared dependencies of the upload and download services.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub datastores: Arc<DatastoreRegistry>,
    pub store: Arc<dyn MediaStore>,
    pub waiters: UploadWaitRegistry,
    pub policy: Arc<dyn UploadPolicy>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn MediaStore>) -> Self {
        let datastores = DatastoreRegistry::new(config.datastores.clone(), config.async_upload_expiry);
        let policy = ConfiguredUploadPolicy::new(&config, store.clone());

        Self {
            config: Arc::new(config),
            datastores: Arc::new(datastores),
            store,
            waiters: UploadWaitRegistry::new(),
            policy: Arc::new(policy),
        }
    }
}
