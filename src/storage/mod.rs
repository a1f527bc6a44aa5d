use async_trait::async_trait;
use thiserror::Error;

pub mod bucket;
pub mod common;
pub mod disk;
pub mod erasure;
pub mod metadata;
pub mod node;
pub mod placement;

/// Stream kind carrying an object's encoded data shards.
pub const DATA_STREAM: &str = "data";
/// Stream kind carrying a per-object metadata replica.
pub const OBJECT_METADATA_FILE: &str = "object_metadata.json";
/// Bucket manifest file, replicated identically on every disk under `xl_name/`.
pub const BUCKET_METADATA_FILE: &str = "bucket_metadata.json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("object not found: {bucket}/{object}")]
    ObjectNotFound { bucket: String, object: String },
    #[error("md5 digest mismatch: expected {expected}, computed {computed}")]
    BadDigest { expected: String, computed: String },
    #[error("checksum mismatch: {bucket}/{object}")]
    ChecksumMismatch { bucket: String, object: String },
    #[error("payload signature does not match")]
    SignDoesNotMatch,
    #[error("parity disk count {parity} exceeds maximum of 127")]
    ParityOverflow { parity: usize },
    #[error("insufficient shards: have {available}, need {required}")]
    InsufficientShards { available: usize, required: usize },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("metadata decode failed: {0}")]
    MetadataDecode(#[from] serde_json::Error),
    #[error("erasure codec failure: {0}")]
    Codec(String),
}

/// Payload signature check, invoked exactly once per write with the hex
/// SHA-256 of the fully consumed stream.
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    async fn verify(&self, sha256_hex: &str) -> Result<bool, StorageError>;
}

pub use bucket::{new_bucket, Bucket, ListObjectsResult, ObjectReader, BLOCK_SIZE};
pub use disk::{Disk, LocalDisk, MemDisk, ObjectWriter};
pub use erasure::{data_and_parity, Erasure};
pub use metadata::{BucketMetadata, ObjectMetadata};
pub use node::{LocalNode, Node};
