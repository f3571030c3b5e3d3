//! Datastore abstraction trait
//!
//! Every backend kind implements the full capability set; operations a backend
//! cannot perform return `StorageError::Unsupported` or
//! `StorageError::DelegationUnsupported` instead of being special-cased by callers.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use mediarepo_core::{AppError, DatastoreKind, ObjectDescriptor, ObjectInfo};
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid location: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("{operation} is not supported by {kind} datastores")]
    Unsupported {
        operation: &'static str,
        kind: DatastoreKind,
    },

    /// Presigned URLs are only available on object storage.
    #[error("Delegated transfers are not supported by {0} datastores")]
    DelegationUnsupported(DatastoreKind),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Input byte stream handed to a backend.
pub type ByteReader = Pin<Box<dyn AsyncRead + Send>>;

/// Output byte stream produced by a backend.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(location) => AppError::NotFound(location),
            StorageError::Unsupported { .. } | StorageError::DelegationUnsupported(_) => {
                AppError::Unsupported(err.to_string())
            }
            StorageError::ConfigError(msg) => AppError::Internal(format!("Datastore configuration: {}", msg)),
            other => AppError::Storage(other.to_string()),
        }
    }
}

/// Datastore backend trait
///
/// Locations are backend-relative object identifiers: a sharded relative path for
/// file datastores, an object key for S3, a content id for IPFS.
#[async_trait]
pub trait Datastore: Send + Sync {
    fn kind(&self) -> DatastoreKind;

    /// Persist a byte stream at a freshly generated location.
    ///
    /// `expected_length <= 0` means the caller does not know the length. The
    /// returned descriptor's digest and size describe exactly the bytes written.
    async fn upload(&self, reader: ByteReader, expected_length: i64) -> StorageResult<ObjectDescriptor>;

    async fn download(&self, location: &str) -> StorageResult<ByteStream>;

    async fn delete(&self, location: &str) -> StorageResult<()>;

    async fn exists(&self, location: &str) -> StorageResult<bool>;

    /// Replace the bytes at an existing location.
    async fn overwrite(&self, location: &str, reader: ByteReader) -> StorageResult<()>;

    async fn object_info(&self, _location: &str) -> StorageResult<ObjectInfo> {
        Err(StorageError::Unsupported {
            operation: "Object info",
            kind: self.kind(),
        })
    }

    /// Signed URL a client can PUT to, and the internal location it will land at.
    async fn upload_url(&self) -> StorageResult<(String, String)> {
        Err(StorageError::DelegationUnsupported(self.kind()))
    }

    /// Signed (or public) GET URL for a stored object.
    async fn download_url(&self, _location: &str, _attachment_filename: Option<&str>) -> StorageResult<String> {
        Err(StorageError::DelegationUnsupported(self.kind()))
    }
}
