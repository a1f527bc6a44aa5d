use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::storage::disk::Disk;
use crate::storage::StorageError;

/// A host grouping one or more disks. The disk order within a node is
/// stable; together with the node's position in the bucket's node map it
/// fixes each disk's shard index.
#[async_trait]
pub trait Node: Send + Sync {
    async fn list_disks(&self) -> Result<BTreeMap<usize, Arc<dyn Disk>>, StorageError>;
}

/// A node over a fixed, ordered set of disks.
pub struct LocalNode {
    disks: Vec<Arc<dyn Disk>>,
}

impl LocalNode {
    pub fn new(disks: Vec<Arc<dyn Disk>>) -> Self {
        Self { disks }
    }
}

#[async_trait]
impl Node for LocalNode {
    async fn list_disks(&self) -> Result<BTreeMap<usize, Arc<dyn Disk>>, StorageError> {
        Ok(self.disks.iter().cloned().enumerate().collect())
    }
}
