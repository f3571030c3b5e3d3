//! Size and quota policy for incoming uploads.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use async_trait::async_trait;
use mediarepo_core::{AppError, Config};
use mediarepo_db::MediaStore;
use tokio::io::{AsyncRead, ReadBuf};

/// Checks consulted before accepting upload bytes.
///
/// Lengths are signed; a negative length means "unknown" and never fails a
/// size check on its own.
#[async_trait]
pub trait UploadPolicy: Send + Sync {
    /// Best length estimate from the declared length and the raw header value.
    fn estimate_content_length(&self, declared_length: i64, header_value: Option<&str>) -> i64 {
        if declared_length > 0 {
            return declared_length;
        }
        header_value
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|v| *v >= 0)
            .unwrap_or(-1)
    }

    fn is_too_large(&self, length: i64) -> bool;

    fn is_too_small(&self, length: i64) -> bool;

    async fn is_within_quota(&self, user_id: &str) -> Result<bool, AppError>;
}

/// Policy driven by `Config` limits, with quota usage summed from the record store.
pub struct ConfiguredUploadPolicy {
    max_upload_size_bytes: u64,
    min_upload_size_bytes: u64,
    quota_max_bytes_per_user: Option<u64>,
    store: Arc<dyn MediaStore>,
}

impl ConfiguredUploadPolicy {
    pub fn new(config: &Config, store: Arc<dyn MediaStore>) -> Self {
        Self {
            max_upload_size_bytes: config.max_upload_size_bytes,
            min_upload_size_bytes: config.min_upload_size_bytes,
            quota_max_bytes_per_user: config
                .quota_enabled
                .then_some(config.quota_max_bytes_per_user),
            store,
        }
    }
}

#[async_trait]
impl UploadPolicy for ConfiguredUploadPolicy {
    fn is_too_large(&self, length: i64) -> bool {
        self.max_upload_size_bytes > 0 && length >= 0 && length as u64 > self.max_upload_size_bytes
    }

    fn is_too_small(&self, length: i64) -> bool {
        self.min_upload_size_bytes > 0 && length >= 0 && (length as u64) < self.min_upload_size_bytes
    }

    async fn is_within_quota(&self, user_id: &str) -> Result<bool, AppError> {
        let Some(limit) = self.quota_max_bytes_per_user else {
            return Ok(true);
        };
        let used = self.store.total_bytes_for_user(user_id).await?;
        Ok((used.max(0) as u64) < limit)
    }
}

/// Read and discard the rest of `reader` so the connection it came from stays usable.
pub async fn drain<R>(mut reader: R)
where
    R: AsyncRead + Unpin,
{
    if let Err(e) = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await {
        tracing::debug!(error = %e, "Failed to drain rejected upload");
    }
}

const DISCARD_CHUNK: usize = 8 * 1024;

/// Passes through at most `limit` bytes of `inner`.
///
/// Past the limit the rest of the input is read and thrown away before end of
/// stream is reported, so a store behind this reader never holds more than
/// `limit` bytes and the sender is never left blocked on a full socket.
pub struct CappedReader<R> {
    inner: R,
    remaining: u64,
}

impl<R> CappedReader<R> {
    pub fn new(inner: R, limit: u64) -> Self {
        Self { inner, remaining: limit }
    }
}

impl<R> AsyncRead for CappedReader<R>
where
    R: AsyncRead + Unpin,
{
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        let this = &mut *self;

        if this.remaining > 0 {
            if buf.remaining() as u64 <= this.remaining {
                let before = buf.filled().len();
                ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
                this.remaining -= (buf.filled().len() - before) as u64;
                return Poll::Ready(Ok(()));
            }

            let mut tail = vec![0u8; this.remaining as usize];
            let mut tail_buf = ReadBuf::new(&mut tail);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut tail_buf))?;
            let n = tail_buf.filled().len();
            buf.put_slice(tail_buf.filled());
            this.remaining -= n as u64;
            return Poll::Ready(Ok(()));
        }

        let mut scratch = [0u8; DISCARD_CHUNK];
        loop {
            let mut discard = ReadBuf::new(&mut scratch);
            match Pin::new(&mut this.inner).poll_read(cx, &mut discard) {
                Poll::Ready(Ok(())) if discard.filled().is_empty() => return Poll::Ready(Ok(())),
                Poll::Ready(Ok(())) => continue,
                Poll::Ready(Err(e)) => {
                    tracing::debug!(error = %e, "Input failed while discarding bytes past the upload limit");
                    return Poll::Ready(Ok(()));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
