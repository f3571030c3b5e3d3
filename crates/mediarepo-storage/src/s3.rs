use crate::digest::ContentDigest;
use crate::keys;
use crate::pipeline::{digest_and_store, spool_to_temp};
use crate::traits::{ByteReader, ByteStream, Datastore, StorageError, StorageResult};
use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use futures::StreamExt;
use mediarepo_core::constants::{options, DEFAULT_S3_REGION, DEFAULT_STORAGE_CLASS};
use mediarepo_core::{DatastoreConfig, DatastoreKind, ObjectDescriptor, ObjectInfo};
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::Error as ObjectStoreError;
use object_store::{
    Attribute, AttributeValue, Attributes, GetOptions, ObjectStore, ObjectStoreExt, PutOptions,
    PutPayload, WriteMultipart,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use url::Url;

/// Largest object sent as a single PUT; anything bigger (or of unknown length)
/// goes through a multipart upload.
const SINGLE_PUT_LIMIT: u64 = 8 * 1024 * 1024;
const MULTIPART_CHUNK_SIZE: usize = 256 * 1024;
const MAX_CONCURRENT_PARTS: usize = 8;

/// Settings for an S3 datastore, parsed from its option map.
#[derive(Clone, Debug)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    pub temp_path: Option<PathBuf>,
    pub storage_class: String,
    pub prefix_length: usize,
    pub public_base_url: Option<String>,
    pub redirect_domain: Option<String>,
    pub upload_url_expiry: Duration,
    pub download_url_expiry: Duration,
}

impl S3Settings {
    pub fn from_config(config: &DatastoreConfig, default_expiry: Duration) -> Self {
        let temp_path = config.option(options::TEMP_PATH).map(PathBuf::from);
        if temp_path.is_none() {
            tracing::warn!(
                datastore_id = %config.id,
                "No temp_path configured for S3 datastore; uploads of unknown length will be streamed without a known size"
            );
        }

        S3Settings {
            bucket: config.option(options::BUCKET_NAME).unwrap_or_default().to_string(),
            region: config
                .option(options::REGION)
                .unwrap_or(DEFAULT_S3_REGION)
                .to_string(),
            temp_path,
            storage_class: config
                .option(options::STORAGE_CLASS)
                .unwrap_or(DEFAULT_STORAGE_CLASS)
                .to_string(),
            prefix_length: config.u64_option(options::PREFIX_LENGTH).unwrap_or(0) as usize,
            public_base_url: config.option(options::PUBLIC_BASE_URL).map(String::from),
            redirect_domain: config.option(options::REDIRECT_DOMAIN).map(String::from),
            upload_url_expiry: default_expiry,
            download_url_expiry: config
                .u64_option(options::PRESIGNED_REDIRECT_EXPIRY_SECS)
                .map(Duration::from_secs)
                .unwrap_or(default_expiry),
        }
    }
}

/// S3-compatible object storage datastore
#[derive(Clone)]
pub struct S3Datastore {
    store: Arc<dyn ObjectStore>,
    /// Present when built from credentials; required for presigned URLs.
    presigner: Option<aws_sdk_s3::Client>,
    settings: S3Settings,
}

impl S3Datastore {
    /// Build an S3 client from datastore options.
    ///
    /// `endpoint`, `bucket_name`, `access_key_id` and `access_secret` are required.
    /// `default_expiry` bounds presigned URLs unless overridden per datastore.
    pub fn from_config(config: &DatastoreConfig, default_expiry: Duration) -> StorageResult<Self> {
        let required = |key: &str| {
            config.option(key).map(String::from).ok_or_else(|| {
                StorageError::ConfigError(format!(
                    "Datastore {} is missing required option {}",
                    config.id, key
                ))
            })
        };

        let endpoint = required(options::ENDPOINT)?;
        required(options::BUCKET_NAME)?;
        let access_key_id = required(options::ACCESS_KEY_ID)?;
        let access_secret = required(options::ACCESS_SECRET)?;

        let settings = S3Settings::from_config(config, default_expiry);
        let use_ssl = config.bool_option_or(options::SSL, true);
        let endpoint = if endpoint.contains("://") {
            endpoint
        } else if use_ssl {
            format!("https://{}", endpoint)
        } else {
            format!("http://{}", endpoint)
        };

        let store = AmazonS3Builder::new()
            .with_endpoint(endpoint.clone())
            .with_allow_http(endpoint.starts_with("http://"))
            .with_bucket_name(settings.bucket.clone())
            .with_region(settings.region.clone())
            .with_access_key_id(access_key_id.clone())
            .with_secret_access_key(access_secret.clone())
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        // Presigning happens locally; this client never sends requests.
        let credentials = Credentials::new(access_key_id, access_secret, None, None, "mediarepo-datastore");
        let presign_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .endpoint_url(endpoint)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Ok(S3Datastore {
            store: Arc::new(store),
            presigner: Some(aws_sdk_s3::Client::from_conf(presign_config)),
            settings,
        })
    }

    /// Use an arbitrary object store (no presigning available).
    pub fn with_store(store: Arc<dyn ObjectStore>, settings: S3Settings) -> Self {
        S3Datastore {
            store,
            presigner: None,
            settings,
        }
    }

    fn presigner(&self) -> StorageResult<&aws_sdk_s3::Client> {
        self.presigner.as_ref().ok_or_else(|| {
            StorageError::BackendError("Object store does not support presigned URLs".to_string())
        })
    }

    fn presigning_config(expiry: Duration) -> StorageResult<PresigningConfig> {
        PresigningConfig::expires_in(expiry).map_err(|e| StorageError::ConfigError(e.to_string()))
    }

    fn put_options(&self) -> PutOptions {
        let mut attributes = Attributes::new();
        attributes.insert(
            Attribute::StorageClass,
            AttributeValue::from(self.settings.storage_class.clone()),
        );
        PutOptions {
            attributes,
            ..Default::default()
        }
    }

    /// Write `reader` to `path`, choosing the transfer mode from the length.
    async fn put_stream<R>(&self, path: &ObjectPath, reader: R, expected_length: i64) -> StorageResult<u64>
    where
        R: AsyncRead + Unpin + Send,
    {
        if expected_length > 0 {
            return self.put_sized(path, reader, expected_length as u64).await;
        }

        match &self.settings.temp_path {
            Some(dir) => {
                let mut spooled = spool_to_temp(reader, dir).await?;
                let length = spooled.length;
                self.put_sized(path, &mut spooled.file, length).await
            }
            None => self.put_multipart(path, reader).await,
        }
    }

    async fn put_sized<R>(&self, path: &ObjectPath, mut reader: R, length: u64) -> StorageResult<u64>
    where
        R: AsyncRead + Unpin + Send,
    {
        if length > SINGLE_PUT_LIMIT {
            return self.put_multipart(path, reader).await;
        }

        let mut data = Vec::with_capacity(length as usize);
        reader
            .read_to_end(&mut data)
            .await
            .map_err(|e| StorageError::UploadFailed(format!("Failed to read upload: {}", e)))?;
        let written = data.len() as u64;

        self.store
            .put_opts(path, PutPayload::from(data), self.put_options())
            .await
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;

        Ok(written)
    }

    async fn put_multipart<R>(&self, path: &ObjectPath, mut reader: R) -> StorageResult<u64>
    where
        R: AsyncRead + Unpin + Send,
    {
        let upload = self
            .store
            .put_multipart(path)
            .await
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;
        let mut writer = WriteMultipart::new(upload);

        let mut buf = vec![0u8; MULTIPART_CHUNK_SIZE];
        let mut written = 0u64;
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    let _ = writer.abort().await;
                    return Err(StorageError::UploadFailed(format!("Failed to read upload: {}", e)));
                }
            };
            if n == 0 {
                break;
            }
            if let Err(e) = writer.wait_for_capacity(MAX_CONCURRENT_PARTS).await {
                let _ = writer.abort().await;
                return Err(StorageError::UploadFailed(e.to_string()));
            }
            writer.write(&buf[..n]);
            written += n as u64;
        }

        writer
            .finish()
            .await
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;

        Ok(written)
    }

    /// Presigned GET. With `attachment_filename` the response is served as an attachment.
    async fn presigned_get(&self, location: &str, attachment_filename: Option<&str>) -> StorageResult<Url> {
        let mut request = self
            .presigner()?
            .get_object()
            .bucket(&self.settings.bucket)
            .key(location);
        if let Some(filename) = attachment_filename.filter(|f| !f.is_empty()) {
            request = request.response_content_disposition(format!(
                "attachment; filename=\"{}\"",
                filename.replace('"', "")
            ));
        }

        let presigned = request
            .presigned(Self::presigning_config(self.settings.download_url_expiry)?)
            .await
            .map_err(|e| StorageError::BackendError(e.to_string()))?;
        let mut url = Url::parse(presigned.uri()).map_err(|e| StorageError::BackendError(e.to_string()))?;

        // The host is not part of what the client must reproduce, so it can change after signing.
        if let Some(domain) = &self.settings.redirect_domain {
            url.set_host(Some(domain.as_str())).map_err(|e| {
                StorageError::ConfigError(format!("Invalid redirect_domain {}: {}", domain, e))
            })?;
        }

        Ok(url)
    }
}

#[async_trait]
impl Datastore for S3Datastore {
    fn kind(&self) -> DatastoreKind {
        DatastoreKind::S3
    }

    async fn upload(&self, reader: ByteReader, expected_length: i64) -> StorageResult<ObjectDescriptor> {
        let location = keys::object_key(self.settings.prefix_length);
        let path = ObjectPath::from(location.as_str());
        let start = Instant::now();

        let result = digest_and_store(
            reader,
            |pipe| self.put_stream(&path, pipe, expected_length),
            |_| async {
                if let Err(e) = self.store.delete(&path).await {
                    tracing::warn!(error = %e, key = %location, "Failed to delete untrusted upload");
                }
            },
        )
        .await;

        let (ContentDigest { sha256_hash, size_bytes }, _) = result.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %self.settings.bucket,
                key = %location,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "S3 upload failed"
            );
            e
        })?;

        tracing::info!(
            bucket = %self.settings.bucket,
            key = %location,
            size_bytes = size_bytes,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 upload successful"
        );

        Ok(ObjectDescriptor {
            location,
            sha256_hash,
            size_bytes,
        })
    }

    async fn download(&self, location: &str) -> StorageResult<ByteStream> {
        let start = Instant::now();
        let path = ObjectPath::from(location);

        let result = self.store.get(&path).await.map_err(|e| match e {
            ObjectStoreError::NotFound { .. } => StorageError::NotFound(location.to_string()),
            other => {
                tracing::error!(
                    error = %other,
                    bucket = %self.settings.bucket,
                    key = %location,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 download failed"
                );
                StorageError::DownloadFailed(other.to_string())
            }
        })?;

        let key = location.to_string();
        let stream = result.into_stream().map(move |res| {
            res.map_err(|e| {
                tracing::error!(error = %e, key = %key, "S3 stream download error");
                StorageError::DownloadFailed(e.to_string())
            })
        });

        Ok(Box::pin(stream))
    }

    async fn delete(&self, location: &str) -> StorageResult<()> {
        let start = Instant::now();
        let path = ObjectPath::from(location);

        self.store.delete(&path).await.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %self.settings.bucket,
                key = %location,
                "S3 delete failed"
            );
            StorageError::DeleteFailed(e.to_string())
        })?;

        tracing::info!(
            bucket = %self.settings.bucket,
            key = %location,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 delete successful"
        );

        Ok(())
    }

    /// Zero-byte objects count as absent.
    async fn exists(&self, location: &str) -> StorageResult<bool> {
        let path = ObjectPath::from(location);
        match self.store.head(&path).await {
            Ok(meta) => Ok(meta.size > 0),
            Err(ObjectStoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(StorageError::BackendError(e.to_string())),
        }
    }

    async fn overwrite(&self, location: &str, reader: ByteReader) -> StorageResult<()> {
        let path = ObjectPath::from(location);
        let written = self.put_stream(&path, reader, -1).await?;

        tracing::info!(
            bucket = %self.settings.bucket,
            key = %location,
            size_bytes = written,
            "S3 overwrite successful"
        );
        Ok(())
    }

    async fn object_info(&self, location: &str) -> StorageResult<ObjectInfo> {
        let path = ObjectPath::from(location);
        let opts = GetOptions {
            head: true,
            ..Default::default()
        };

        let result = self.store.get_opts(&path, opts).await.map_err(|e| match e {
            ObjectStoreError::NotFound { .. } => StorageError::NotFound(location.to_string()),
            other => StorageError::BackendError(other.to_string()),
        })?;

        let content_type = result
            .attributes
            .get(&Attribute::ContentType)
            .map(|v| AsRef::<str>::as_ref(v).to_string())
            .unwrap_or_default();

        Ok(ObjectInfo {
            size_bytes: result.meta.size as i64,
            content_type,
        })
    }

    async fn upload_url(&self) -> StorageResult<(String, String)> {
        let location = keys::object_key(self.settings.prefix_length);

        let presigned = self
            .presigner()?
            .put_object()
            .bucket(&self.settings.bucket)
            .key(&location)
            .presigned(Self::presigning_config(self.settings.upload_url_expiry)?)
            .await
            .map_err(|e| StorageError::BackendError(e.to_string()))?;

        Ok((presigned.uri().to_string(), location))
    }

    async fn download_url(&self, location: &str, attachment_filename: Option<&str>) -> StorageResult<String> {
        if let Some(base) = &self.settings.public_base_url {
            return Ok(format!("{}{}", base, location));
        }
        Ok(self.presigned_get(location, attachment_filename).await?.to_string())
    }
}
