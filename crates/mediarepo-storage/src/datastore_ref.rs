//! Uniform handle over one configured datastore.

use crate::traits::{ByteReader, ByteStream, Datastore, StorageResult};
use mediarepo_core::constants::options;
use mediarepo_core::{DatastoreConfig, DatastoreKind, ObjectDescriptor, ObjectInfo};
use std::sync::Arc;

/// A configured datastore: its static configuration plus the backend instance.
///
/// Callers never branch on the backend kind; capability questions are answered
/// here from configuration, everything else is forwarded to the backend.
#[derive(Clone)]
pub struct DatastoreRef {
    config: DatastoreConfig,
    backend: Arc<dyn Datastore>,
}

impl std::fmt::Debug for DatastoreRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatastoreRef")
            .field("id", &self.config.id)
            .field("kind", &self.config.kind)
            .finish()
    }
}

impl DatastoreRef {
    pub fn new(config: DatastoreConfig, backend: Arc<dyn Datastore>) -> Self {
        Self { config, backend }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn kind(&self) -> DatastoreKind {
        self.config.kind
    }

    pub fn config(&self) -> &DatastoreConfig {
        &self.config
    }

    pub async fn upload(&self, reader: ByteReader, expected_length: i64) -> StorageResult<ObjectDescriptor> {
        self.backend.upload(reader, expected_length).await
    }

    pub async fn download(&self, location: &str) -> StorageResult<ByteStream> {
        self.backend.download(location).await
    }

    pub async fn delete(&self, location: &str) -> StorageResult<()> {
        self.backend.delete(location).await
    }

    /// Backend errors read as "absent".
    pub async fn exists(&self, location: &str) -> bool {
        match self.backend.exists(location).await {
            Ok(exists) => exists,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    datastore_id = %self.config.id,
                    location = %location,
                    "Existence check failed"
                );
                false
            }
        }
    }

    pub async fn object_info(&self, location: &str) -> StorageResult<ObjectInfo> {
        self.backend.object_info(location).await
    }

    pub async fn overwrite(&self, location: &str, reader: ByteReader) -> StorageResult<()> {
        self.backend.overwrite(location, reader).await
    }

    pub fn should_redirect_upload(&self) -> bool {
        self.kind().supports_delegation() && self.config.bool_option(options::REDIRECT_UPLOADS)
    }

    pub fn should_redirect_download(&self) -> bool {
        self.kind().supports_delegation() && self.config.bool_option(options::REDIRECT_DOWNLOADS)
    }

    /// `(upload_url, location)` for a delegated upload.
    pub async fn get_upload_url(&self) -> StorageResult<(String, String)> {
        self.backend.upload_url().await
    }

    /// Backend GET URL; `attachment_filename` forces an attachment response.
    pub async fn get_download_url(&self, location: &str, attachment_filename: Option<&str>) -> StorageResult<String> {
        self.backend.download_url(location, attachment_filename).await
    }

    /// Where a download of `location` should be redirected, if anywhere.
    ///
    /// A public base URL wins over presigning; with neither configured the
    /// bytes are streamed through the server. Presigned targets carry
    /// `attachment_filename` as a content-disposition override when given.
    pub async fn redirect_target(
        &self,
        location: &str,
        attachment_filename: Option<&str>,
    ) -> StorageResult<Option<String>> {
        if !self.should_redirect_download() {
            return Ok(None);
        }

        if let Some(base) = self.config.option(options::PUBLIC_BASE_URL) {
            return Ok(Some(format!("{}{}", base, location)));
        }

        if self.config.bool_option(options::PRESIGNED_REDIRECT) {
            return self.get_download_url(location, attachment_filename).await.map(Some);
        }

        Ok(None)
    }
}
