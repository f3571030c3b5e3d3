//! Mediarepo Storage Library
//!
//! Datastore abstraction and its backends: local files, S3-compatible object
//! storage and IPFS. Every backend implements the full `Datastore` trait; callers
//! work through `DatastoreRef` handles obtained from a `DatastoreRegistry`.
//!
//! # Locations
//!
//! - **file**: `aa/bb/<rest>` relative to the datastore path
//! - **s3**: a random 64 character key, optionally split after `prefix_length` characters
//! - **ipfs**: the content id returned by the node
//!
//! Uploads on every backend go through the `pipeline` module, which hashes the
//! stream while it is being written.

pub mod datastore_ref;
pub mod digest;
pub mod factory;
#[cfg(feature = "storage-file")]
pub mod file;
#[cfg(feature = "storage-ipfs")]
pub mod ipfs;
pub mod keys;
pub mod pipeline;
pub mod registry;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use datastore_ref::DatastoreRef;
pub use digest::{sha256_stream, ContentDigest};
pub use factory::create_datastore;
#[cfg(feature = "storage-file")]
pub use file::FileDatastore;
#[cfg(feature = "storage-ipfs")]
pub use ipfs::IpfsDatastore;
pub use mediarepo_core::DatastoreKind;
pub use registry::DatastoreRegistry;
#[cfg(feature = "storage-s3")]
pub use s3::{S3Datastore, S3Settings};
pub use traits::{ByteReader, ByteStream, Datastore, StorageError, StorageResult};
