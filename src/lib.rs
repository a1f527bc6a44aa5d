pub mod config;
pub mod observability;
pub mod storage;

pub use config::Config;
pub use storage::{
    new_bucket, Bucket, BucketMetadata, ListObjectsResult, ObjectMetadata, ObjectReader,
    SignatureVerifier, StorageError, BLOCK_SIZE,
};
