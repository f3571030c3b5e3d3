//! Mediarepo Services Layer
//!
//! Upload and download coordination on top of the storage and record-store
//! crates: reservations, streamed and delegated uploads, completion
//! notification and download resolution. Request handling code depends on this
//! crate only.

pub mod download;
pub mod policy;
pub mod state;
pub mod upload;
pub mod upload_waiter;

pub use download::{
    content_disposition_header, Disposition, DownloadRequest, DownloadResponse, DownloadService,
    MediaStream,
};
pub use policy::{drain, ConfiguredUploadPolicy, UploadPolicy};
pub use state::AppState;
pub use upload::{Reservation, UploadRequest, UploadService};
pub use upload_waiter::{UploadWaitRegistry, WaiterHandle};
