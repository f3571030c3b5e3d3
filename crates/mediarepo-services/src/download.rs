//! Download resolution: redirect or stream, waiting on pending uploads first.

use std::sync::Arc;
use std::time::Duration;

use mediarepo_core::{AppError, MediaRecord};
use mediarepo_storage::ByteStream;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::state::AppState;

/// RFC 5987 attr-char set: everything except ALPHA / DIGIT / "!#$&+-.^_`|~" is encoded.
const FILENAME_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// Requested content disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Disposition {
    Attachment,
    Inline,
    #[default]
    Infer,
}

impl Disposition {
    /// From an "as attachment" hint: `true`, `false`, or absent.
    pub fn from_hint(as_attachment: Option<bool>) -> Self {
        match as_attachment {
            Some(true) => Disposition::Attachment,
            Some(false) => Disposition::Inline,
            None => Disposition::Infer,
        }
    }

    /// `"inline"` or `"attachment"` for a concrete content type.
    pub fn resolve(self, content_type: &str) -> &'static str {
        match self {
            Disposition::Attachment => "attachment",
            Disposition::Inline => "inline",
            Disposition::Infer => {
                let essence = content_type
                    .split(';')
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .to_ascii_lowercase();
                let inline = essence.starts_with("image/")
                    || essence.starts_with("video/")
                    || essence.starts_with("audio/")
                    || essence == "text/plain"
                    || essence == "application/pdf";
                if inline {
                    "inline"
                } else {
                    "attachment"
                }
            }
        }
    }
}

/// `Content-Disposition` header value with an RFC 5987 encoded filename.
pub fn content_disposition_header(disposition: &str, filename: &str) -> String {
    if filename.is_empty() {
        return disposition.to_string();
    }
    format!(
        "{}; filename*=utf-8''{}",
        disposition,
        utf8_percent_encode(filename, FILENAME_ENCODE_SET)
    )
}

#[derive(Debug, Clone, Default)]
pub struct DownloadRequest {
    pub origin: String,
    pub media_id: String,
    /// Overrides the stored upload name.
    pub filename: Option<String>,
    /// The caller accepts a redirect instead of bytes.
    pub allow_redirect: bool,
    pub disposition: Disposition,
    /// How long to wait for a pending upload; `None` uses the configured maximum.
    pub max_stall: Option<Duration>,
}

/// Bytes served through this process.
pub struct MediaStream {
    pub content_type: String,
    pub filename: String,
    pub size_bytes: i64,
    /// Ready-to-use `Content-Disposition` value.
    pub content_disposition: String,
    pub stream: ByteStream,
}

pub enum DownloadResponse {
    Redirect { url: String },
    Stream(MediaStream),
}

#[derive(Clone)]
pub struct DownloadService {
    state: Arc<AppState>,
}

impl DownloadService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    #[tracing::instrument(skip(self, request), fields(origin = %request.origin, media_id = %request.media_id))]
    pub async fn resolve(&self, request: DownloadRequest) -> Result<DownloadResponse, AppError> {
        let record = self
            .finalized_record(&request.origin, &request.media_id, request.max_stall)
            .await?;
        let datastore = self.state.datastores.get(&record.datastore_id).await?;

        let filename = request
            .filename
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| record.upload_name.clone());

        let disposition = request.disposition.resolve(&record.content_type);

        if request.allow_redirect {
            let attachment_filename =
                (disposition == "attachment" && !filename.is_empty()).then_some(filename.as_str());
            if let Some(url) = datastore
                .redirect_target(&record.location, attachment_filename)
                .await?
            {
                tracing::debug!(datastore_id = %datastore.id(), "Redirecting download");
                return Ok(DownloadResponse::Redirect { url });
            }
        }

        let stream = datastore.download(&record.location).await?;

        Ok(DownloadResponse::Stream(MediaStream {
            content_disposition: content_disposition_header(disposition, &filename),
            content_type: record.content_type,
            filename,
            size_bytes: record.size_bytes,
            stream,
        }))
    }

    /// Wait budget for a request, bounded by the configured maximum stall.
    fn wait_budget(&self, requested: Option<Duration>) -> Option<Duration> {
        let config = &self.state.config;
        if !config.async_uploads_enabled {
            return None;
        }
        let budget = requested
            .map(|d| d.min(config.async_max_stall))
            .unwrap_or(config.async_max_stall);
        (!budget.is_zero()).then_some(budget)
    }

    async fn visible_record(&self, origin: &str, media_id: &str) -> Result<MediaRecord, AppError> {
        let record = self
            .state
            .store
            .get(origin, media_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("mxc://{}/{}", origin, media_id)))?;

        if record.quarantined {
            tracing::debug!(origin = %origin, media_id = %media_id, "Download of quarantined media refused");
            return Err(AppError::NotFound(record.content_uri()));
        }
        Ok(record)
    }

    /// The record once it is finalized, parking on the wait registry if needed.
    async fn finalized_record(
        &self,
        origin: &str,
        media_id: &str,
        max_stall: Option<Duration>,
    ) -> Result<MediaRecord, AppError> {
        let record = self.visible_record(origin, media_id).await?;
        if record.is_finalized() {
            return Ok(record);
        }

        let not_yet_uploaded = || AppError::NotYetUploaded(format!("mxc://{}/{}", origin, media_id));
        let Some(budget) = self.wait_budget(max_stall) else {
            return Err(not_yet_uploaded());
        };

        let waiters = &self.state.waiters;
        let handle = waiters.start_wait(origin, media_id);

        // The upload may have completed between the first read and registration.
        let record = self.visible_record(origin, media_id).await?;
        if record.is_finalized() {
            waiters.cancel_wait(handle);
            return Ok(record);
        }

        tracing::debug!(budget_ms = budget.as_millis() as u64, "Waiting for pending upload");
        waiters.wait(handle, budget).await;

        let record = self.visible_record(origin, media_id).await?;
        if record.is_finalized() {
            Ok(record)
        } else {
            Err(not_yet_uploaded())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infer_disposition_from_content_type() {
        assert_eq!(Disposition::Infer.resolve("image/png"), "inline");
        assert_eq!(Disposition::Infer.resolve("text/plain; charset=utf-8"), "inline");
        assert_eq!(Disposition::Infer.resolve("Application/PDF"), "inline");
        assert_eq!(Disposition::Infer.resolve("text/html"), "attachment");
        assert_eq!(Disposition::Infer.resolve("application/octet-stream"), "attachment");
        assert_eq!(Disposition::Attachment.resolve("image/png"), "attachment");
        assert_eq!(Disposition::Inline.resolve("text/html"), "inline");
    }

    #[test]
    fn disposition_hint() {
        assert_eq!(Disposition::from_hint(Some(true)), Disposition::Attachment);
        assert_eq!(Disposition::from_hint(Some(false)), Disposition::Inline);
        assert_eq!(Disposition::from_hint(None), Disposition::Infer);
    }

    #[test]
    fn disposition_header_encodes_filename() {
        assert_eq!(content_disposition_header("inline", ""), "inline");
        assert_eq!(
            content_disposition_header("attachment", "cat picture.png"),
            "attachment; filename*=utf-8''cat%20picture.png"
        );
        assert_eq!(
            content_disposition_header("inline", "naïve\".txt"),
            "inline; filename*=utf-8''na%C3%AFve%22.txt"
        );
    }
}
