use crate::media::MediaStore;
use async_trait::async_trait;
use mediarepo_core::{AppError, MediaRecord};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;

/// Process-local record store.
#[derive(Default)]
pub struct InMemoryMediaStore {
    records: RwLock<HashMap<(String, String), MediaRecord>>,
    references: RwLock<HashMap<(String, String), BTreeSet<String>>>,
}

impl InMemoryMediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

fn key(origin: &str, media_id: &str) -> (String, String) {
    (origin.to_string(), media_id.to_string())
}

#[async_trait]
impl MediaStore for InMemoryMediaStore {
    async fn get(&self, origin: &str, media_id: &str) -> Result<Option<MediaRecord>, AppError> {
        Ok(self.records.read().await.get(&key(origin, media_id)).cloned())
    }

    async fn create(&self, record: &MediaRecord) -> Result<(), AppError> {
        let mut records = self.records.write().await;
        let k = key(&record.origin, &record.media_id);
        if records.contains_key(&k) {
            return Err(AppError::Duplicate(record.content_uri()));
        }
        records.insert(k, record.clone());
        Ok(())
    }

    async fn finalize(&self, record: &MediaRecord) -> Result<bool, AppError> {
        let mut records = self.records.write().await;
        match records.get_mut(&key(&record.origin, &record.media_id)) {
            Some(existing) if !existing.is_finalized() => {
                existing.datastore_id = record.datastore_id.clone();
                existing.location = record.location.clone();
                existing.content_type = record.content_type.clone();
                existing.size_bytes = record.size_bytes;
                existing.sha256_hash = record.sha256_hash.clone();
                existing.upload_name = record.upload_name.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_sha256_hash(&self, origin: &str, media_id: &str, sha256_hash: &str) -> Result<(), AppError> {
        if let Some(existing) = self.records.write().await.get_mut(&key(origin, media_id)) {
            existing.sha256_hash = sha256_hash.to_string();
        }
        Ok(())
    }

    async fn find_by_hash(&self, sha256_hash: &str) -> Result<Vec<MediaRecord>, AppError> {
        let mut found: Vec<MediaRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.sha256_hash == sha256_hash && r.is_finalized() && !r.quarantined)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.created_at);
        Ok(found)
    }

    async fn is_hash_quarantined(&self, sha256_hash: &str) -> Result<bool, AppError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .any(|r| r.quarantined && r.sha256_hash == sha256_hash))
    }

    async fn total_bytes_for_user(&self, user_id: &str) -> Result<i64, AppError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.uploader_user_id == user_id)
            .map(|r| r.size_bytes)
            .sum())
    }

    async fn add_reference(&self, origin: &str, media_id: &str, room_id: &str) -> Result<(), AppError> {
        self.references
            .write()
            .await
            .entry(key(origin, media_id))
            .or_default()
            .insert(room_id.to_string());
        Ok(())
    }

    async fn references(&self, origin: &str, media_id: &str) -> Result<Vec<String>, AppError> {
        Ok(self
            .references
            .read()
            .await
            .get(&key(origin, media_id))
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_rejects_collisions() {
        let store = InMemoryMediaStore::new();
        let record = MediaRecord::reserved("example.org", "abc", "files", "@alice:example.org");

        store.create(&record).await.unwrap();
        assert!(matches!(store.create(&record).await, Err(AppError::Duplicate(_))));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn finalize_and_hash_are_separate_mutations() {
        let store = InMemoryMediaStore::new();
        let mut record = MediaRecord::reserved("example.org", "abc", "files", "@alice:example.org");
        store.create(&record).await.unwrap();

        record.size_bytes = 12;
        record.content_type = "text/plain".to_string();
        assert!(store.finalize(&record).await.unwrap());
        store.set_sha256_hash("example.org", "abc", "deadbeef").await.unwrap();

        let stored = store.get("example.org", "abc").await.unwrap().unwrap();
        assert_eq!(stored.size_bytes, 12);
        assert_eq!(stored.sha256_hash, "deadbeef");
        assert_eq!(store.find_by_hash("deadbeef").await.unwrap().len(), 1);
        assert_eq!(store.total_bytes_for_user("@alice:example.org").await.unwrap(), 12);
    }

    #[tokio::test]
    async fn finalize_applies_only_once() {
        let store = InMemoryMediaStore::new();
        let reserved = MediaRecord::reserved("example.org", "abc", "files", "");
        store.create(&reserved).await.unwrap();

        let mut first = reserved.clone();
        first.location = "first".to_string();
        first.size_bytes = 4;
        let mut second = reserved.clone();
        second.location = "second".to_string();
        second.size_bytes = 9;

        assert!(store.finalize(&first).await.unwrap());
        assert!(!store.finalize(&second).await.unwrap());

        let stored = store.get("example.org", "abc").await.unwrap().unwrap();
        assert_eq!(stored.location, "first");
        assert_eq!(stored.size_bytes, 4);
    }

    #[tokio::test]
    async fn finalize_of_unknown_record_matches_nothing() {
        let store = InMemoryMediaStore::new();
        let mut record = MediaRecord::reserved("example.org", "missing", "files", "");
        record.size_bytes = 1;
        assert!(!store.finalize(&record).await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn references_are_deduplicated_and_sorted() {
        let store = InMemoryMediaStore::new();
        store.add_reference("example.org", "abc", "!b:example.org").await.unwrap();
        store.add_reference("example.org", "abc", "!a:example.org").await.unwrap();
        store.add_reference("example.org", "abc", "!b:example.org").await.unwrap();

        assert_eq!(
            store.references("example.org", "abc").await.unwrap(),
            vec!["!a:example.org".to_string(), "!b:example.org".to_string()]
        );
        assert!(store.references("example.org", "other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn quarantined_records_are_not_dedup_candidates() {
        let store = InMemoryMediaStore::new();
        let mut record = MediaRecord::reserved("example.org", "q", "files", "");
        record.size_bytes = 3;
        record.sha256_hash = "cafe".to_string();
        record.quarantined = true;
        store.create(&record).await.unwrap();

        assert!(store.find_by_hash("cafe").await.unwrap().is_empty());
        assert!(store.is_hash_quarantined("cafe").await.unwrap());
        assert!(!store.is_hash_quarantined("beef").await.unwrap());
    }
}
