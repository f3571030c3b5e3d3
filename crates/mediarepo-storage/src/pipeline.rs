//! Concurrent digest + store pipeline.
//!
//! The source is read exactly once. A digest task hashes every chunk and forwards
//! it through an in-memory pipe to the store task, so hashing and writing overlap.
//! Both tasks are joined before a result is reported.

use std::future::Future;
use std::io::SeekFrom;
use std::path::Path;

use tempfile::TempPath;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, DuplexStream};

use crate::digest::{ContentDigest, DigestWriter};
use crate::traits::{StorageError, StorageResult};

const PIPE_CAPACITY: usize = 64 * 1024;
const CHUNK_SIZE: usize = 64 * 1024;

/// Hash `source` while forwarding its bytes into `pipe`.
///
/// If the store side hangs up early the remaining input is still hashed, so the
/// source is always consumed to the end. A read error drops the pipe, which the
/// store side observes as end of input.
async fn digest_into<R>(mut source: R, pipe: DuplexStream) -> std::io::Result<ContentDigest>
where
    R: AsyncRead + Unpin,
{
    let mut digest = DigestWriter::new();
    let mut pipe = Some(pipe);
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        digest.update(&buf[..n]);

        if let Some(writer) = pipe.as_mut() {
            if writer.write_all(&buf[..n]).await.is_err() {
                pipe = None;
            }
        }
    }

    if let Some(mut writer) = pipe {
        let _ = writer.shutdown().await;
    }

    Ok(digest.finish())
}

/// Run the digest and store tasks over one source.
///
/// `store` consumes the pipe and yields whatever identifies the written object.
/// When digesting fails after the store succeeded, `cleanup` receives that value
/// and must remove the object; the digest error is then returned. Otherwise a
/// store failure is returned as is.
pub async fn digest_and_store<R, T, S, SF, C, CF>(
    source: R,
    store: S,
    cleanup: C,
) -> StorageResult<(ContentDigest, T)>
where
    R: AsyncRead + Unpin,
    S: FnOnce(DuplexStream) -> SF,
    SF: Future<Output = StorageResult<T>>,
    C: FnOnce(T) -> CF,
    CF: Future<Output = ()>,
{
    let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
    let (digested, stored) = tokio::join!(digest_into(source, writer), store(reader));

    match digested {
        Err(e) => {
            if let Ok(stored) = stored {
                cleanup(stored).await;
            }
            Err(StorageError::UploadFailed(format!(
                "Failed to read upload stream: {}",
                e
            )))
        }
        Ok(digest) => Ok((digest, stored?)),
    }
}

/// Input buffered to a temporary file so its length is known.
///
/// The file is deleted when this value is dropped.
pub struct SpooledInput {
    pub file: File,
    pub length: u64,
    _path: TempPath,
}

/// Drain `reader` into a temporary file under `temp_dir` and rewind it.
pub async fn spool_to_temp<R>(mut reader: R, temp_dir: &Path) -> StorageResult<SpooledInput>
where
    R: AsyncRead + Unpin,
{
    let temp = tempfile::Builder::new()
        .prefix("mr")
        .tempfile_in(temp_dir)
        .map_err(|e| {
            StorageError::UploadFailed(format!(
                "Failed to create temp file in {}: {}",
                temp_dir.display(),
                e
            ))
        })?;
    let (file, path) = temp.into_parts();
    let mut file = File::from_std(file);

    let length = tokio::io::copy(&mut reader, &mut file)
        .await
        .map_err(|e| StorageError::UploadFailed(format!("Failed to buffer upload: {}", e)))?;
    file.flush().await?;
    file.seek(SeekFrom::Start(0)).await?;

    tracing::debug!(
        path = %path.display(),
        size_bytes = length,
        "Buffered upload of unknown length to temp file"
    );

    Ok(SpooledInput {
        file,
        length,
        _path: path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::sha256_bytes;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Yields `data`, then fails.
    struct FailingReader {
        data: Vec<u8>,
        sent: bool,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if !self.sent {
                self.sent = true;
                buf.put_slice(&self.data);
                Poll::Ready(Ok(()))
            } else {
                Poll::Ready(Err(std::io::Error::other("client disconnected")))
            }
        }
    }

    #[tokio::test]
    async fn store_sees_identical_bytes() {
        let data: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();

        let (digest, stored) = digest_and_store(
            std::io::Cursor::new(data.clone()),
            |mut pipe| async move {
                let mut out = Vec::new();
                pipe.read_to_end(&mut out).await?;
                Ok::<_, StorageError>(out)
            },
            |_| async {},
        )
        .await
        .unwrap();

        assert_eq!(stored, data);
        assert_eq!(digest.size_bytes, data.len() as i64);
        assert_eq!(digest.sha256_hash, sha256_bytes(&data));
    }

    #[tokio::test]
    async fn digest_failure_cleans_up_stored_object() {
        let cleaned = Arc::new(AtomicBool::new(false));
        let flag = cleaned.clone();

        let result = digest_and_store(
            FailingReader {
                data: b"partial".to_vec(),
                sent: false,
            },
            |mut pipe| async move {
                let mut out = Vec::new();
                pipe.read_to_end(&mut out).await?;
                Ok::<_, StorageError>("loc/1".to_string())
            },
            move |location| async move {
                assert_eq!(location, "loc/1");
                flag.store(true, Ordering::SeqCst);
            },
        )
        .await;

        assert!(matches!(result, Err(StorageError::UploadFailed(_))));
        assert!(cleaned.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn store_failure_is_reported_and_source_drained() {
        let data = vec![7u8; 200_000];
        let result: StorageResult<(ContentDigest, ())> = digest_and_store(
            std::io::Cursor::new(data),
            |_pipe| async { Err(StorageError::BackendError("bucket gone".into())) },
            |_| async { panic!("cleanup must not run when the store failed") },
        )
        .await;

        assert!(matches!(result, Err(StorageError::BackendError(_))));
    }

    #[tokio::test]
    async fn spooled_file_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let mut spooled = spool_to_temp(std::io::Cursor::new(b"spool me".to_vec()), dir.path())
            .await
            .unwrap();
        assert_eq!(spooled.length, 8);

        let mut contents = Vec::new();
        spooled.file.read_to_end(&mut contents).await.unwrap();
        assert_eq!(contents, b"spool me");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        drop(spooled);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
