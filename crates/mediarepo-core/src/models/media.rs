use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::object::ObjectDescriptor;

/// One logical media object, keyed by `(origin, media_id)`.
///
/// A record with `size_bytes == 0` is a reservation: the id exists but its
/// bytes have not arrived yet. `sha256_hash` may stay empty on an otherwise
/// finalized record while the background digest is still running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct MediaRecord {
    pub origin: String,
    pub media_id: String,
    pub datastore_id: String,
    pub location: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub sha256_hash: String,
    pub upload_name: String,
    pub uploader_user_id: String,
    pub created_at: DateTime<Utc>,
    pub quarantined: bool,
}

impl MediaRecord {
    /// A reservation with no bytes and no location yet.
    pub fn reserved(
        origin: impl Into<String>,
        media_id: impl Into<String>,
        datastore_id: impl Into<String>,
        uploader_user_id: impl Into<String>,
    ) -> Self {
        Self {
            origin: origin.into(),
            media_id: media_id.into(),
            datastore_id: datastore_id.into(),
            location: String::new(),
            content_type: String::new(),
            size_bytes: 0,
            sha256_hash: String::new(),
            upload_name: String::new(),
            uploader_user_id: uploader_user_id.into(),
            created_at: Utc::now(),
            quarantined: false,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.size_bytes > 0
    }

    /// Copy a store result onto the record.
    pub fn apply_descriptor(&mut self, descriptor: &ObjectDescriptor) {
        self.location = descriptor.location.clone();
        self.size_bytes = descriptor.size_bytes;
        self.sha256_hash = descriptor.sha256_hash.clone();
    }

    pub fn content_uri(&self) -> String {
        format!("mxc://{}/{}", self.origin, self.media_id)
    }
}
