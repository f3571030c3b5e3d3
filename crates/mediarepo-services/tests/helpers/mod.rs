#![allow(dead_code)]

use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::StreamExt;
use mediarepo_core::{Config, MediaRecord};
use mediarepo_db::{InMemoryMediaStore, MediaStore};
use mediarepo_services::{AppState, DownloadRequest, DownloadService, UploadRequest, UploadService};
use mediarepo_storage::{ByteReader, ByteStream, S3Datastore, S3Settings};
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStoreExt, PutPayload};
use tempfile::TempDir;
use tokio::io::{AsyncRead, ReadBuf};

pub const ORIGIN: &str = "example.org";
pub const USER: &str = "@alice:example.org";
pub const PUBLIC_BASE_URL: &str = "https://cdn.example/";

/// Services wired to a file datastore (`files`) and an in-memory S3 datastore (`s3mem`).
pub struct TestContext {
    pub state: Arc<AppState>,
    pub uploads: UploadService,
    pub downloads: DownloadService,
    pub store: Arc<InMemoryMediaStore>,
    pub objects: Arc<InMemory>,
    dir: TempDir,
}

pub async fn setup(overrides: &[(&str, &str)]) -> TestContext {
    let dir = tempfile::tempdir().unwrap();

    let mut vars: Vec<(String, String)> = vec![
        ("DATASTORES".into(), "files,s3mem".into()),
        ("DATASTORE_FILES_TYPE".into(), "file".into()),
        ("DATASTORE_FILES_PATH".into(), dir.path().display().to_string()),
        ("DATASTORE_S3MEM_TYPE".into(), "s3".into()),
        ("DATASTORE_S3MEM_BUCKET_NAME".into(), "media".into()),
        ("DATASTORE_S3MEM_REDIRECT_DOWNLOADS".into(), "true".into()),
        ("DATASTORE_S3MEM_PUBLIC_BASE_URL".into(), PUBLIC_BASE_URL.into()),
        ("ASYNC_MAX_STALL_MS".into(), "5000".into()),
    ];
    vars.extend(overrides.iter().map(|(k, v)| (k.to_string(), v.to_string())));
    let config = Config::from_vars(vars).unwrap();

    let store = Arc::new(InMemoryMediaStore::new());
    let state = Arc::new(AppState::new(config, store.clone()));

    let objects = Arc::new(InMemory::new());
    let s3_config = state.datastores.config("s3mem").unwrap().clone();
    let settings = S3Settings::from_config(&s3_config, state.config.async_upload_expiry);
    state
        .datastores
        .register(s3_config, Arc::new(S3Datastore::with_store(objects.clone(), settings)))
        .await;

    TestContext {
        uploads: UploadService::new(state.clone()),
        downloads: DownloadService::new(state.clone()),
        state,
        store,
        objects,
        dir,
    }
}

pub fn reader(data: &[u8]) -> ByteReader {
    Box::pin(std::io::Cursor::new(data.to_vec()))
}

/// Counts every byte the consumer pulls out of `data`.
pub struct CountingReader {
    data: std::io::Cursor<Vec<u8>>,
    consumed: Arc<AtomicUsize>,
}

impl AsyncRead for CountingReader {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let polled = Pin::new(&mut self.data).poll_read(cx, buf);
        self.consumed.fetch_add(buf.filled().len() - before, Ordering::SeqCst);
        polled
    }
}

pub fn counting_reader(data: Vec<u8>) -> (ByteReader, Arc<AtomicUsize>) {
    let consumed = Arc::new(AtomicUsize::new(0));
    let reader = CountingReader {
        data: std::io::Cursor::new(data),
        consumed: consumed.clone(),
    };
    (Box::pin(reader), consumed)
}

pub fn upload_request(declared_length: i64) -> UploadRequest {
    UploadRequest {
        origin: ORIGIN.to_string(),
        user_id: USER.to_string(),
        filename: "cat.png".to_string(),
        content_type: Some("image/png".to_string()),
        declared_length,
        ..Default::default()
    }
}

pub fn download_request(media_id: &str, max_stall: Option<Duration>) -> DownloadRequest {
    DownloadRequest {
        origin: ORIGIN.to_string(),
        media_id: media_id.to_string(),
        max_stall,
        ..Default::default()
    }
}

pub async fn collect(mut stream: ByteStream) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    out
}

impl TestContext {
    pub async fn record(&self, media_id: &str) -> MediaRecord {
        self.store.get(ORIGIN, media_id).await.unwrap().unwrap()
    }

    /// Files currently held by the `files` datastore.
    pub fn stored_files(&self) -> usize {
        fn count(dir: &std::path::Path) -> usize {
            std::fs::read_dir(dir)
                .unwrap()
                .map(|entry| {
                    let path = entry.unwrap().path();
                    if path.is_dir() { count(&path) } else { 1 }
                })
                .sum()
        }
        count(self.dir.path())
    }

    /// Insert a reservation on `s3mem` whose bytes are expected at `location`.
    pub async fn reserve_at(&self, location: &str) -> String {
        let media_id = mediarepo_storage::keys::random_string(12);
        let mut record = MediaRecord::reserved(ORIGIN, media_id.clone(), "s3mem", USER);
        record.location = location.to_string();
        self.store.create(&record).await.unwrap();
        media_id
    }

    pub async fn put_object(&self, location: &str, data: &'static [u8]) {
        self.objects
            .put(&ObjectPath::from(location), PutPayload::from_static(data))
            .await
            .unwrap();
    }

    /// Simulate a client PUT to a presigned URL: a reservation pointing at
    /// `location` on `s3mem`, with the bytes already written there.
    pub async fn put_direct(&self, location: &str, data: &'static [u8]) -> String {
        let media_id = self.reserve_at(location).await;
        self.put_object(location, data).await;
        media_id
    }
}
