//! SHA-256 content digests.

use crate::traits::{ByteStream, StorageResult};
use futures::StreamExt;
use sha2::{Digest, Sha256};

/// Digest and byte count of one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDigest {
    /// Lowercase hex
    pub sha256_hash: String,
    pub size_bytes: i64,
}

/// Incremental hasher that also counts bytes.
#[derive(Default)]
pub struct DigestWriter {
    hasher: Sha256,
    size: u64,
}

impl DigestWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.size += chunk.len() as u64;
    }

    pub fn finish(self) -> ContentDigest {
        ContentDigest {
            sha256_hash: hex::encode(self.hasher.finalize()),
            size_bytes: self.size as i64,
        }
    }
}

/// Hash a downloaded object.
pub async fn sha256_stream(mut stream: ByteStream) -> StorageResult<ContentDigest> {
    let mut digest = DigestWriter::new();
    while let Some(chunk) = stream.next().await {
        digest.update(&chunk?);
    }
    Ok(digest.finish())
}

pub fn sha256_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
