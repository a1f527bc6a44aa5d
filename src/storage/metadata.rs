use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Schema version stamped into both metadata documents.
pub const METADATA_VERSION: &str = "1.0.0";

/// Serialized as `{}`; the manifest stores name sets as JSON objects with
/// empty values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {}

/// Bucket manifest, written identically to every disk that backs the
/// bucket. Readers accept the first replica that decodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketMetadata {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "ACL")]
    pub acl: String,
    #[serde(rename = "Created")]
    pub created: DateTime<Utc>,
    #[serde(rename = "Metadata")]
    pub metadata: HashMap<String, String>,
    #[serde(rename = "BucketObjects")]
    pub objects: BTreeMap<String, Member>,
    #[serde(rename = "Multiparts")]
    pub multiparts: BTreeMap<String, Member>,
}

impl BucketMetadata {
    pub fn new(name: &str, acl: &str, created: DateTime<Utc>) -> Self {
        Self {
            version: METADATA_VERSION.to_string(),
            name: name.to_string(),
            acl: acl.to_string(),
            created,
            metadata: HashMap::new(),
            objects: BTreeMap::new(),
            multiparts: BTreeMap::new(),
        }
    }

    /// Membership check by normalized object name.
    pub fn contains_object(&self, normalized_name: &str) -> bool {
        self.objects.contains_key(normalized_name)
    }

    pub fn insert_object(&mut self, normalized_name: &str) {
        self.objects.insert(normalized_name.to_string(), Member {});
    }
}

/// Per-object metadata, replicated on every data-bearing disk once a write
/// succeeds. `object` preserves the caller's original name; the manifest
/// and the on-disk layout use the normalized form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMetadata {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Bucket")]
    pub bucket: String,
    #[serde(rename = "Object")]
    pub object: String,
    #[serde(rename = "Created")]
    pub created: DateTime<Utc>,
    #[serde(rename = "Size")]
    pub size: u64,
    #[serde(rename = "BlockSize")]
    pub block_size: usize,
    #[serde(rename = "ChunkCount")]
    pub chunk_count: usize,
    #[serde(rename = "DataDisks")]
    pub data_disks: u8,
    #[serde(rename = "ParityDisks")]
    pub parity_disks: u8,
    #[serde(rename = "MD5Sum")]
    pub md5_sum: String,
    #[serde(rename = "SHA512Sum")]
    pub sha512_sum: String,
    #[serde(rename = "Metadata")]
    pub metadata: HashMap<String, String>,
}
