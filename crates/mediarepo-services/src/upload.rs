//! Upload service
//!
//! Three entry points:
//! - `create_reservation` hands out a media id before any bytes exist, with a
//!   presigned upload URL when the upload datastore delegates uploads.
//! - `upload_media` streams a request body into the upload datastore, either
//!   as new media or into a previously reserved id.
//! - `upload_complete` finalizes a reservation whose bytes were PUT straight to
//!   the backend, wakes waiting readers, then digests the object in the background.
//!
//! A reservation is finalized at most once. When two writers race for the same
//! id the store accepts only the first; the loser discards its object.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mediarepo_core::constants::{DEFAULT_CONTENT_TYPE, MEDIA_ID_LENGTH};
use mediarepo_core::{AppError, MediaRecord, ObjectDescriptor};
use mediarepo_storage::keys::random_string;
use mediarepo_storage::{sha256_stream, ByteReader, DatastoreRef};
use tokio::task::JoinHandle;

use crate::policy::{drain, CappedReader};
use crate::state::AppState;

const MAX_ID_ATTEMPTS: usize = 5;

/// Result of `create_reservation`.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub media_id: String,
    pub content_uri: String,
    pub unused_expires_at: DateTime<Utc>,
    /// Present when the client should PUT the bytes directly to the datastore.
    pub upload_url: Option<String>,
}

/// Metadata accompanying an upload body.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub origin: String,
    /// Upload into this reserved id instead of allocating a new one.
    pub media_id: Option<String>,
    pub user_id: String,
    pub filename: String,
    pub content_type: Option<String>,
    /// Length known to the transport; `<= 0` when unknown.
    pub declared_length: i64,
    /// Raw `Content-Length` header, if any.
    pub content_length_header: Option<String>,
    /// Room the media is being posted to, recorded as a reference.
    pub room_id: Option<String>,
}

#[derive(Clone)]
pub struct UploadService {
    state: Arc<AppState>,
}

impl UploadService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Reserve a media id for a later upload.
    #[tracing::instrument(skip(self), fields(upload.operation = "reserve"))]
    pub async fn create_reservation(
        &self,
        origin: &str,
        user_id: &str,
        room_id: Option<&str>,
    ) -> Result<Reservation, AppError> {
        let config = &self.state.config;
        if !config.async_uploads_enabled {
            return Err(AppError::Unsupported("Asynchronous uploads are disabled".to_string()));
        }

        let datastore = self.state.datastores.get(&config.upload_datastore).await?;

        let mut location = String::new();
        let mut upload_url = None;
        if datastore.should_redirect_upload() {
            match datastore.get_upload_url().await {
                Ok((url, object_location)) => {
                    upload_url = Some(url);
                    location = object_location;
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        datastore_id = %datastore.id(),
                        "Failed to get presigned upload URL; client must upload through the server"
                    );
                }
            }
        }

        let mut record = MediaRecord::reserved(origin, "", datastore.id(), user_id);
        record.location = location;
        self.create_with_fresh_id(&mut record).await?;
        self.reference_room(&record, room_id).await?;

        tracing::info!(
            origin = %record.origin,
            media_id = %record.media_id,
            delegated = upload_url.is_some(),
            "Media reserved"
        );

        Ok(Reservation {
            content_uri: record.content_uri(),
            unused_expires_at: record.created_at
                + chrono::Duration::from_std(config.async_upload_expiry)
                    .unwrap_or_else(|_| chrono::Duration::days(1)),
            media_id: record.media_id,
            upload_url,
        })
    }

    /// Stream an upload body into the upload datastore.
    ///
    /// Rejected uploads have their body drained before the error is returned.
    #[tracing::instrument(skip(self, request, reader), fields(origin = %request.origin, media_id = ?request.media_id))]
    pub async fn upload_media(&self, request: UploadRequest, reader: ByteReader) -> Result<MediaRecord, AppError> {
        let length = self
            .state
            .policy
            .estimate_content_length(request.declared_length, request.content_length_header.as_deref());

        let (reserved, datastore) = match self.admit(&request, length).await {
            Ok(admitted) => admitted,
            Err(e) => {
                drain(reader).await;
                return Err(e);
            }
        };

        let reader: ByteReader = match self.state.config.max_upload_size_bytes {
            0 => reader,
            max => Box::pin(CappedReader::new(reader, max.saturating_add(1))),
        };
        let descriptor = datastore.upload(reader, length).await?;

        if let Err(e) = self.check_observed_size(&descriptor) {
            self.discard(&datastore, &descriptor.location).await;
            return Err(e);
        }
        if let Err(e) = self.reject_quarantined(&descriptor).await {
            self.discard(&datastore, &descriptor.location).await;
            return Err(e);
        }

        let (datastore_id, location) = self.deduplicate(&datastore, &descriptor).await;
        let owns_object = datastore_id == datastore.id() && location == descriptor.location;
        let stored = ObjectDescriptor { location, ..descriptor };
        let content_type = request
            .content_type
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        let upload_name = base_name(&request.filename).to_string();

        let record = match reserved {
            Some(mut record) => {
                record.datastore_id = datastore_id;
                record.apply_descriptor(&stored);
                record.content_type = content_type;
                record.upload_name = upload_name;
                if !self.state.store.finalize(&record).await? {
                    tracing::info!(
                        origin = %record.origin,
                        media_id = %record.media_id,
                        "Reservation finalized by another upload"
                    );
                    if owns_object {
                        self.discard(&datastore, &stored.location).await;
                    }
                    return Err(AppError::CannotOverwrite(record.content_uri()));
                }
                record
            }
            None => {
                let mut record = MediaRecord {
                    origin: request.origin,
                    media_id: String::new(),
                    datastore_id,
                    location: stored.location,
                    content_type,
                    size_bytes: stored.size_bytes,
                    sha256_hash: stored.sha256_hash,
                    upload_name,
                    uploader_user_id: request.user_id,
                    created_at: Utc::now(),
                    quarantined: false,
                };
                self.create_with_fresh_id(&mut record).await?;
                record
            }
        };

        // A reader may have parked on a reserved id before these bytes arrived.
        self.state.waiters.notify(&record.origin, &record.media_id);

        tracing::info!(
            origin = %record.origin,
            media_id = %record.media_id,
            datastore_id = %record.datastore_id,
            size_bytes = record.size_bytes,
            "Media uploaded"
        );

        self.reference_room(&record, request.room_id.as_deref()).await?;

        Ok(record)
    }

    /// Record that `room_id` uses an existing piece of media.
    #[tracing::instrument(skip(self), fields(upload.operation = "reference"))]
    pub async fn add_media_reference(&self, origin: &str, media_id: &str, room_id: &str) -> Result<(), AppError> {
        if room_id.trim().is_empty() {
            return Err(AppError::InvalidInput("room_id is required".to_string()));
        }
        let record = self
            .state
            .store
            .get(origin, media_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("mxc://{}/{}", origin, media_id)))?;

        self.reference_room(&record, Some(room_id)).await
    }

    /// Finalize a delegated upload.
    ///
    /// Completing an already finalized record is a successful no-op.
    #[tracing::instrument(skip(self), fields(upload.operation = "complete"))]
    pub async fn upload_complete(&self, origin: &str, media_id: &str) -> Result<MediaRecord, AppError> {
        let mut record = self
            .state
            .store
            .get(origin, media_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("mxc://{}/{}", origin, media_id)))?;

        if record.location.is_empty() {
            tracing::warn!(origin = %origin, media_id = %media_id, "Upload complete for media with no location");
            return Err(AppError::NotFound(record.content_uri()));
        }

        if record.is_finalized() {
            tracing::info!(origin = %origin, media_id = %media_id, "Upload already complete");
            return Ok(record);
        }

        let datastore = self.state.datastores.get(&record.datastore_id).await?;
        let info = datastore.object_info(&record.location).await?;
        if info.size_bytes <= 0 {
            return Err(AppError::InvalidInput("Uploaded object is empty".to_string()));
        }

        record.size_bytes = info.size_bytes;
        record.content_type = if info.content_type.is_empty() {
            DEFAULT_CONTENT_TYPE.to_string()
        } else {
            info.content_type
        };
        if !self.state.store.finalize(&record).await? {
            tracing::info!(origin = %origin, media_id = %media_id, "Upload completed concurrently");
            return self
                .state
                .store
                .get(origin, media_id)
                .await?
                .filter(MediaRecord::is_finalized)
                .ok_or_else(|| AppError::NotFound(format!("mxc://{}/{}", origin, media_id)));
        }

        self.state.waiters.notify(origin, media_id);
        self.spawn_digest(datastore, record.clone());

        Ok(record)
    }

    /// Compute and store the digest of a finalized record, detached from the caller.
    pub(crate) fn spawn_digest(&self, datastore: Arc<DatastoreRef>, record: MediaRecord) -> JoinHandle<()> {
        let store = self.state.store.clone();
        tokio::spawn(async move {
            let digest = match datastore.download(&record.location).await {
                Ok(stream) => sha256_stream(stream).await,
                Err(e) => Err(e),
            };

            let digest = match digest {
                Ok(digest) => digest,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        origin = %record.origin,
                        media_id = %record.media_id,
                        "Background digest failed"
                    );
                    return;
                }
            };

            if let Err(e) = store
                .set_sha256_hash(&record.origin, &record.media_id, &digest.sha256_hash)
                .await
            {
                tracing::warn!(
                    error = %e,
                    origin = %record.origin,
                    media_id = %record.media_id,
                    "Failed to persist background digest"
                );
                return;
            }

            tracing::debug!(
                origin = %record.origin,
                media_id = %record.media_id,
                sha256_hash = %digest.sha256_hash,
                "Background digest stored"
            );
        })
    }

    /// Policy checks and target lookup done before any bytes are consumed.
    async fn admit(
        &self,
        request: &UploadRequest,
        length: i64,
    ) -> Result<(Option<MediaRecord>, Arc<DatastoreRef>), AppError> {
        let policy = &self.state.policy;
        if policy.is_too_large(length) {
            return Err(AppError::PayloadTooLarge(format!("{} bytes", length)));
        }
        if policy.is_too_small(length) {
            return Err(AppError::PayloadTooSmall(format!("{} bytes", length)));
        }
        if !policy.is_within_quota(&request.user_id).await? {
            return Err(AppError::QuotaExceeded(request.user_id.clone()));
        }

        let reserved = match &request.media_id {
            Some(media_id) => {
                let record = self
                    .state
                    .store
                    .get(&request.origin, media_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("mxc://{}/{}", request.origin, media_id)))?;
                if record.is_finalized() {
                    return Err(AppError::CannotOverwrite(record.content_uri()));
                }
                Some(record)
            }
            None => None,
        };

        let datastore = self
            .state
            .datastores
            .get(&self.state.config.upload_datastore)
            .await?;

        Ok((reserved, datastore))
    }

    /// Size checks that need the stored byte count (unknown-length uploads).
    fn check_observed_size(&self, descriptor: &ObjectDescriptor) -> Result<(), AppError> {
        if descriptor.size_bytes <= 0 {
            return Err(AppError::PayloadTooSmall("empty upload".to_string()));
        }
        if self.state.policy.is_too_large(descriptor.size_bytes) {
            return Err(AppError::PayloadTooLarge(format!("{} bytes", descriptor.size_bytes)));
        }
        if self.state.policy.is_too_small(descriptor.size_bytes) {
            return Err(AppError::PayloadTooSmall(format!("{} bytes", descriptor.size_bytes)));
        }
        Ok(())
    }

    async fn reject_quarantined(&self, descriptor: &ObjectDescriptor) -> Result<(), AppError> {
        if descriptor.sha256_hash.is_empty() {
            return Ok(());
        }
        if self.state.store.is_hash_quarantined(&descriptor.sha256_hash).await? {
            tracing::warn!(sha256_hash = %descriptor.sha256_hash, "Upload matches quarantined content");
            return Err(AppError::ContentNotPermitted(format!(
                "sha256 {} is quarantined",
                descriptor.sha256_hash
            )));
        }
        Ok(())
    }

    async fn reference_room(&self, record: &MediaRecord, room_id: Option<&str>) -> Result<(), AppError> {
        let Some(room_id) = room_id.filter(|r| !r.trim().is_empty()) else {
            return Ok(());
        };
        self.state
            .store
            .add_reference(&record.origin, &record.media_id, room_id)
            .await?;
        tracing::info!(
            origin = %record.origin,
            media_id = %record.media_id,
            room_id = %room_id,
            "Media referenced in room"
        );
        Ok(())
    }

    /// Reuse an existing object with the same digest, if one is still present.
    ///
    /// Returns the `(datastore_id, location)` the record should point at.
    async fn deduplicate(&self, datastore: &DatastoreRef, descriptor: &ObjectDescriptor) -> (String, String) {
        let fresh = (datastore.id().to_string(), descriptor.location.clone());

        let candidates = match self.state.store.find_by_hash(&descriptor.sha256_hash).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(error = %e, "Duplicate lookup failed; keeping new object");
                return fresh;
            }
        };

        for candidate in candidates {
            if candidate.datastore_id == fresh.0 && candidate.location == fresh.1 {
                return fresh;
            }

            let existing = match self.state.datastores.get(&candidate.datastore_id).await {
                Ok(existing) => existing,
                Err(e) => {
                    tracing::warn!(error = %e, datastore_id = %candidate.datastore_id, "Skipping duplicate candidate");
                    continue;
                }
            };
            if !existing.exists(&candidate.location).await {
                continue;
            }

            tracing::info!(
                sha256_hash = %descriptor.sha256_hash,
                datastore_id = %candidate.datastore_id,
                location = %candidate.location,
                "Duplicate content; reusing existing object"
            );
            self.discard(datastore, &descriptor.location).await;
            return (candidate.datastore_id, candidate.location);
        }

        fresh
    }

    async fn discard(&self, datastore: &DatastoreRef, location: &str) {
        if let Err(e) = datastore.delete(location).await {
            tracing::warn!(error = %e, datastore_id = %datastore.id(), location = %location, "Failed to delete object");
        }
    }

    /// Insert `record` under a newly generated media id, retrying on collisions.
    async fn create_with_fresh_id(&self, record: &mut MediaRecord) -> Result<(), AppError> {
        for _ in 0..MAX_ID_ATTEMPTS {
            record.media_id = random_string(MEDIA_ID_LENGTH);
            match self.state.store.create(record).await {
                Ok(()) => return Ok(()),
                Err(AppError::Duplicate(uri)) => {
                    tracing::debug!(content_uri = %uri, "Media id collision; retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(AppError::Internal(format!(
            "Failed to allocate a media id after {} attempts",
            MAX_ID_ATTEMPTS
        )))
    }
}

/// Final path component of a client-supplied filename.
fn base_name(filename: &str) -> &str {
    filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_name_strips_directories() {
        assert_eq!(base_name("cat.png"), "cat.png");
        assert_eq!(base_name("../../etc/cat.png"), "cat.png");
        assert_eq!(base_name("C:\\Users\\alice\\cat.png"), "cat.png");
        assert_eq!(base_name("photos/"), "");
        assert_eq!(base_name(""), "");
    }
}
