//! Mediarepo Core Library
//!
//! Domain models, error types and configuration shared by the storage, database
//! and service crates.

pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod storage_types;

// Re-export commonly used types
pub use config::Config;
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use models::{DatastoreConfig, MediaRecord, ObjectDescriptor, ObjectInfo};
pub use storage_types::DatastoreKind;

pub type AppResult<T> = Result<T, AppError>;
