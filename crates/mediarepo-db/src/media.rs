use async_trait::async_trait;
use mediarepo_core::{AppError, MediaRecord};
use sqlx::PgPool;

/// Persistence contract for media records.
///
/// Implementations never hold locks across calls; callers re-read a record
/// before acting on its state.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn get(&self, origin: &str, media_id: &str) -> Result<Option<MediaRecord>, AppError>;

    /// Insert a new record; `AppError::Duplicate` if the key is taken.
    async fn create(&self, record: &MediaRecord) -> Result<(), AppError>;

    /// Write location, size and content metadata onto a record that is still a
    /// reservation (`size_bytes = 0`).
    ///
    /// Returns `false` when no reservation matched: the record is missing or was
    /// finalized concurrently. Callers re-read to tell the two apart.
    async fn finalize(&self, record: &MediaRecord) -> Result<bool, AppError>;

    /// Set only the digest, leaving every other field untouched.
    async fn set_sha256_hash(&self, origin: &str, media_id: &str, sha256_hash: &str) -> Result<(), AppError>;

    /// Finalized, non-quarantined records with the given digest, oldest first.
    async fn find_by_hash(&self, sha256_hash: &str) -> Result<Vec<MediaRecord>, AppError>;

    /// Whether any quarantined record carries this digest.
    async fn is_hash_quarantined(&self, sha256_hash: &str) -> Result<bool, AppError>;

    /// Sum of `size_bytes` over a user's records.
    async fn total_bytes_for_user(&self, user_id: &str) -> Result<i64, AppError>;

    /// Record that a room uses this media. Adding the same room twice is a no-op.
    async fn add_reference(&self, origin: &str, media_id: &str, room_id: &str) -> Result<(), AppError>;

    /// Rooms referencing the media, sorted.
    async fn references(&self, origin: &str, media_id: &str) -> Result<Vec<String>, AppError>;
}

/// PostgreSQL record store
#[derive(Clone)]
pub struct PgMediaStore {
    pool: PgPool,
}

impl PgMediaStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MediaStore for PgMediaStore {
    async fn get(&self, origin: &str, media_id: &str) -> Result<Option<MediaRecord>, AppError> {
        let record = sqlx::query_as::<_, MediaRecord>(
            r#"
            SELECT origin, media_id, datastore_id, location, content_type, size_bytes,
                   sha256_hash, upload_name, uploader_user_id, created_at, quarantined
            FROM media
            WHERE origin = $1 AND media_id = $2
            "#,
        )
        .bind(origin)
        .bind(media_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn create(&self, record: &MediaRecord) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO media (
                origin, media_id, datastore_id, location, content_type, size_bytes,
                sha256_hash, upload_name, uploader_user_id, created_at, quarantined
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (origin, media_id) DO NOTHING
            "#,
        )
        .bind(&record.origin)
        .bind(&record.media_id)
        .bind(&record.datastore_id)
        .bind(&record.location)
        .bind(&record.content_type)
        .bind(record.size_bytes)
        .bind(&record.sha256_hash)
        .bind(&record.upload_name)
        .bind(&record.uploader_user_id)
        .bind(record.created_at)
        .bind(record.quarantined)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Duplicate(record.content_uri()));
        }

        tracing::debug!(
            origin = %record.origin,
            media_id = %record.media_id,
            datastore_id = %record.datastore_id,
            "Media record created"
        );
        Ok(())
    }

    async fn finalize(&self, record: &MediaRecord) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE media
            SET datastore_id = $3, location = $4, content_type = $5, size_bytes = $6,
                sha256_hash = $7, upload_name = $8
            WHERE origin = $1 AND media_id = $2 AND size_bytes = 0
            "#,
        )
        .bind(&record.origin)
        .bind(&record.media_id)
        .bind(&record.datastore_id)
        .bind(&record.location)
        .bind(&record.content_type)
        .bind(record.size_bytes)
        .bind(&record.sha256_hash)
        .bind(&record.upload_name)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_sha256_hash(&self, origin: &str, media_id: &str, sha256_hash: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE media SET sha256_hash = $3 WHERE origin = $1 AND media_id = $2")
            .bind(origin)
            .bind(media_id)
            .bind(sha256_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_by_hash(&self, sha256_hash: &str) -> Result<Vec<MediaRecord>, AppError> {
        let records = sqlx::query_as::<_, MediaRecord>(
            r#"
            SELECT origin, media_id, datastore_id, location, content_type, size_bytes,
                   sha256_hash, upload_name, uploader_user_id, created_at, quarantined
            FROM media
            WHERE sha256_hash = $1 AND size_bytes > 0 AND NOT quarantined
            ORDER BY created_at
            "#,
        )
        .bind(sha256_hash)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn is_hash_quarantined(&self, sha256_hash: &str) -> Result<bool, AppError> {
        let quarantined: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM media WHERE sha256_hash = $1 AND quarantined)",
        )
        .bind(sha256_hash)
        .fetch_one(&self.pool)
        .await?;

        Ok(quarantined)
    }

    async fn total_bytes_for_user(&self, user_id: &str) -> Result<i64, AppError> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(size_bytes), 0)::BIGINT FROM media WHERE uploader_user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }

    async fn add_reference(&self, origin: &str, media_id: &str, room_id: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO media_references (origin, media_id, room_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (origin, media_id, room_id) DO NOTHING
            "#,
        )
        .bind(origin)
        .bind(media_id)
        .bind(room_id)
        .execute(&self.pool)
        .await?;

        tracing::debug!(origin = %origin, media_id = %media_id, room_id = %room_id, "Media reference stored");
        Ok(())
    }

    async fn references(&self, origin: &str, media_id: &str) -> Result<Vec<String>, AppError> {
        let rooms: Vec<String> = sqlx::query_scalar(
            "SELECT room_id FROM media_references WHERE origin = $1 AND media_id = $2 ORDER BY room_id",
        )
        .bind(origin)
        .bind(media_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rooms)
    }
}
