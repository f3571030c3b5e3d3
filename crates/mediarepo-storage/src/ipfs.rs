use crate::digest::ContentDigest;
use crate::pipeline::digest_and_store;
use crate::traits::{ByteReader, ByteStream, Datastore, StorageError, StorageResult};
use async_trait::async_trait;
use futures::StreamExt;
use mediarepo_core::constants::{options, DEFAULT_IPFS_API_URL};
use mediarepo_core::{DatastoreConfig, DatastoreKind, ObjectDescriptor};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use serde::Deserialize;
use std::time::Instant;
use tokio::io::DuplexStream;
use tokio_util::io::ReaderStream;

#[derive(Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

/// IPFS datastore over the node's HTTP API
///
/// Locations are content ids. Content is shared with the wider network, so
/// removal and in-place replacement are not offered.
#[derive(Clone)]
pub struct IpfsDatastore {
    client: Client,
    api_url: String,
}

impl IpfsDatastore {
    pub fn new(api_url: impl Into<String>) -> Self {
        IpfsDatastore {
            client: Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &DatastoreConfig) -> Self {
        Self::new(config.option(options::API_URL).unwrap_or(DEFAULT_IPFS_API_URL))
    }

    async fn add(&self, pipe: DuplexStream) -> StorageResult<String> {
        let body = Body::wrap_stream(ReaderStream::new(pipe));
        let form = Form::new().part("file", Part::stream(body).file_name("media"));

        let response = self
            .client
            .post(format!("{}/api/v0/add", self.api_url))
            .query(&[("pin", "true"), ("cid-version", "1")])
            .multipart(form)
            .send()
            .await
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;

        let added: AddResponse = response
            .json()
            .await
            .map_err(|e| StorageError::BackendError(format!("Unexpected add response: {}", e)))?;

        Ok(added.hash)
    }
}

#[async_trait]
impl Datastore for IpfsDatastore {
    fn kind(&self) -> DatastoreKind {
        DatastoreKind::Ipfs
    }

    async fn upload(&self, reader: ByteReader, _expected_length: i64) -> StorageResult<ObjectDescriptor> {
        let start = Instant::now();

        // Added content cannot be removed, so there is nothing to clean up.
        let result = digest_and_store(reader, |pipe| self.add(pipe), |_| async {}).await;

        let (ContentDigest { sha256_hash, size_bytes }, cid) = result.map_err(|e| {
            tracing::error!(
                error = %e,
                api_url = %self.api_url,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "IPFS upload failed"
            );
            e
        })?;

        tracing::info!(
            cid = %cid,
            size_bytes = size_bytes,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "IPFS upload successful"
        );

        Ok(ObjectDescriptor {
            location: cid,
            sha256_hash,
            size_bytes,
        })
    }

    async fn download(&self, location: &str) -> StorageResult<ByteStream> {
        let response = self
            .client
            .post(format!("{}/api/v0/cat", self.api_url))
            .query(&[("arg", location)])
            .send()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?;

        if !response.status().is_success() {
            tracing::error!(
                cid = %location,
                status = response.status().as_u16(),
                "IPFS download failed"
            );
            return Err(StorageError::DownloadFailed(format!(
                "IPFS cat returned {}",
                response.status()
            )));
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| StorageError::DownloadFailed(e.to_string())));
        Ok(Box::pin(stream))
    }

    async fn delete(&self, location: &str) -> StorageResult<()> {
        tracing::warn!(cid = %location, "Deleting from an IPFS datastore is not supported; leaving content in place");
        Ok(())
    }

    async fn exists(&self, location: &str) -> StorageResult<bool> {
        tracing::warn!(cid = %location, "IPFS datastores cannot report object existence");
        Ok(false)
    }

    async fn overwrite(&self, _location: &str, _reader: ByteReader) -> StorageResult<()> {
        Err(StorageError::Unsupported {
            operation: "Overwrite",
            kind: DatastoreKind::Ipfs,
        })
    }
}
