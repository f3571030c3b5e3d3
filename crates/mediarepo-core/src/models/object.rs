use serde::{Deserialize, Serialize};

/// Result of a completed store operation.
///
/// `sha256_hash` is the lowercase hex digest of exactly the bytes that were
/// written, and `size_bytes` their count; both are suitable as a dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    pub location: String,
    pub sha256_hash: String,
    pub size_bytes: i64,
}

/// Backend-reported metadata for a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub size_bytes: i64,
    pub content_type: String,
}
