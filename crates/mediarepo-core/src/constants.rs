//! Option keys and defaults shared by configuration and the storage backends.

/// Datastore option keys
pub mod options {
    // file
    pub const PATH: &str = "path";

    // s3
    pub const ENDPOINT: &str = "endpoint";
    pub const BUCKET_NAME: &str = "bucket_name";
    pub const ACCESS_KEY_ID: &str = "access_key_id";
    pub const ACCESS_SECRET: &str = "access_secret";
    pub const REGION: &str = "region";
    pub const SSL: &str = "ssl";
    pub const TEMP_PATH: &str = "temp_path";
    pub const STORAGE_CLASS: &str = "storage_class";
    pub const PREFIX_LENGTH: &str = "prefix_length";
    pub const REDIRECT_UPLOADS: &str = "redirect_uploads";
    pub const REDIRECT_DOWNLOADS: &str = "redirect_downloads";
    pub const PUBLIC_BASE_URL: &str = "public_base_url";
    pub const PRESIGNED_REDIRECT: &str = "presigned_redirect";
    pub const PRESIGNED_REDIRECT_EXPIRY_SECS: &str = "presigned_redirect_expiry_secs";
    pub const REDIRECT_DOMAIN: &str = "redirect_domain";

    // ipfs
    pub const API_URL: &str = "api_url";
}

pub const DEFAULT_S3_REGION: &str = "us-east-1";
pub const DEFAULT_STORAGE_CLASS: &str = "STANDARD";
pub const DEFAULT_IPFS_API_URL: &str = "http://127.0.0.1:5001";

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Length of generated media ids and object keys.
pub const MEDIA_ID_LENGTH: usize = 32;
pub const OBJECT_KEY_LENGTH: usize = 64;
