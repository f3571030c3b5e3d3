#[cfg(feature = "storage-file")]
use crate::FileDatastore;
#[cfg(feature = "storage-ipfs")]
use crate::IpfsDatastore;
#[cfg(feature = "storage-s3")]
use crate::S3Datastore;
use crate::{Datastore, StorageError, StorageResult};
use mediarepo_core::{DatastoreConfig, DatastoreKind};
use std::sync::Arc;
use std::time::Duration;

/// Create a backend for one datastore configuration.
///
/// `default_expiry` is the async upload expiry, used for presigned URLs.
pub async fn create_datastore(
    config: &DatastoreConfig,
    default_expiry: Duration,
) -> StorageResult<Arc<dyn Datastore>> {
    match config.kind {
        #[cfg(feature = "storage-file")]
        DatastoreKind::File => {
            let path = config
                .option(mediarepo_core::constants::options::PATH)
                .ok_or_else(|| {
                    StorageError::ConfigError(format!("Datastore {} is missing required option path", config.id))
                })?;
            Ok(Arc::new(FileDatastore::new(path).await?))
        }

        #[cfg(not(feature = "storage-file"))]
        DatastoreKind::File => Err(StorageError::ConfigError(
            "File datastore not available (storage-file feature not enabled)".to_string(),
        )),

        #[cfg(feature = "storage-s3")]
        DatastoreKind::S3 => Ok(Arc::new(S3Datastore::from_config(config, default_expiry)?)),

        #[cfg(not(feature = "storage-s3"))]
        DatastoreKind::S3 => Err(StorageError::ConfigError(
            "S3 datastore not available (storage-s3 feature not enabled)".to_string(),
        )),

        #[cfg(feature = "storage-ipfs")]
        DatastoreKind::Ipfs => Ok(Arc::new(IpfsDatastore::from_config(config))),

        #[cfg(not(feature = "storage-ipfs"))]
        DatastoreKind::Ipfs => Err(StorageError::ConfigError(
            "IPFS datastore not available (storage-ipfs feature not enabled)".to_string(),
        )),
    }
}
