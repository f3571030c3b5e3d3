use crate::digest::ContentDigest;
use crate::keys;
use crate::pipeline::digest_and_store;
use crate::traits::{ByteReader, ByteStream, Datastore, StorageError, StorageResult};
use async_trait::async_trait;
use futures::StreamExt;
use mediarepo_core::{DatastoreKind, ObjectDescriptor};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};

/// Local filesystem datastore
///
/// Objects live under `base_path` at sharded relative locations (`aa/bb/rest`).
#[derive(Clone)]
pub struct FileDatastore {
    base_path: PathBuf,
}

impl FileDatastore {
    /// Create a new FileDatastore, creating `base_path` if needed.
    pub async fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create datastore directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(FileDatastore { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Convert a location to a filesystem path, refusing anything that could
    /// escape the base directory.
    fn location_to_path(&self, location: &str) -> StorageResult<PathBuf> {
        if location.is_empty() || location.contains("..") || location.starts_with('/') {
            return Err(StorageError::InvalidKey(
                "Location contains invalid characters".to_string(),
            ));
        }

        let path = self.base_path.join(location);

        let base_canonical = self.base_path.canonicalize().map_err(|e| {
            StorageError::ConfigError(format!("Failed to canonicalize base path: {}", e))
        })?;

        if let Ok(canonical) = path.canonicalize() {
            if canonical.strip_prefix(&base_canonical).is_err() {
                return Err(StorageError::InvalidKey(
                    "Location resolves outside datastore directory".to_string(),
                ));
            }
        }

        Ok(path)
    }

    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    async fn write_file<R>(&self, path: &Path, mut reader: R) -> StorageResult<u64>
    where
        R: AsyncRead + Unpin,
    {
        let mut file = fs::File::create(path).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to create file {}: {}", path.display(), e))
        })?;

        let written = tokio::io::copy(&mut reader, &mut file).await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "Failed to write stream to file {}: {}",
                path.display(),
                e
            ))
        })?;

        file.flush().await?;
        file.sync_all().await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to sync file {}: {}", path.display(), e))
        })?;

        Ok(written)
    }

    /// `write_file`, removing whatever was written if it fails part way.
    async fn store_file<R>(&self, path: &Path, reader: R) -> StorageResult<u64>
    where
        R: AsyncRead + Unpin,
    {
        let written = self.write_file(path, reader).await;
        if written.is_err() {
            remove_partial(path).await;
        }
        written
    }
}

async fn remove_partial(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "Failed to remove partial upload");
        }
    }
}

#[async_trait]
impl Datastore for FileDatastore {
    fn kind(&self) -> DatastoreKind {
        DatastoreKind::File
    }

    async fn upload(&self, reader: ByteReader, _expected_length: i64) -> StorageResult<ObjectDescriptor> {
        let location = keys::file_location();
        let path = self.location_to_path(&location)?;
        self.ensure_parent_dir(&path).await?;

        let start = Instant::now();

        let result = digest_and_store(
            reader,
            |pipe| self.store_file(&path, pipe),
            |_| remove_partial(&path),
        )
        .await;

        let (ContentDigest { sha256_hash, size_bytes }, _) = result.map_err(|e| {
            tracing::error!(
                error = %e,
                path = %path.display(),
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "File datastore upload failed"
            );
            e
        })?;

        tracing::info!(
            path = %path.display(),
            location = %location,
            size_bytes = size_bytes,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "File datastore upload successful"
        );

        Ok(ObjectDescriptor {
            location,
            sha256_hash,
            size_bytes,
        })
    }

    async fn download(&self, location: &str) -> StorageResult<ByteStream> {
        let path = self.location_to_path(location)?;

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(location.to_string()));
        }

        let file = fs::File::open(&path).await.map_err(|e| {
            StorageError::DownloadFailed(format!("Failed to open file {}: {}", path.display(), e))
        })?;

        let path_display = path.display().to_string();
        let stream = tokio_util::io::ReaderStream::new(file).map(move |result| {
            result.map_err(|e| {
                tracing::error!(error = %e, path = %path_display, "File datastore stream error");
                StorageError::DownloadFailed(format!("Failed to read chunk: {}", e))
            })
        });

        Ok(Box::pin(stream))
    }

    async fn delete(&self, location: &str) -> StorageResult<()> {
        let path = self.location_to_path(location)?;
        let start = Instant::now();

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }

        fs::remove_file(&path).await.map_err(|e| {
            StorageError::DeleteFailed(format!("Failed to delete file {}: {}", path.display(), e))
        })?;

        tracing::info!(
            path = %path.display(),
            location = %location,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "File datastore delete successful"
        );

        Ok(())
    }

    async fn exists(&self, location: &str) -> StorageResult<bool> {
        let path = self.location_to_path(location)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn overwrite(&self, location: &str, reader: ByteReader) -> StorageResult<()> {
        let path = self.location_to_path(location)?;
        self.ensure_parent_dir(&path).await?;
        let written = self.write_file(&path, reader).await?;

        tracing::info!(
            path = %path.display(),
            size_bytes = written,
            "File datastore overwrite successful"
        );
        Ok(())
    }
}
