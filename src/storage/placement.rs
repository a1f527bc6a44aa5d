use std::collections::BTreeMap;
use std::sync::Arc;

use crate::storage::disk::{Disk, DiskReader, ObjectWriter};
use crate::storage::node::Node;
use crate::storage::{StorageError, BUCKET_METADATA_FILE};

/// Deterministic mapping from (bucket, object, stream kind) to one path per
/// disk. Shard index i is the i-th disk in `(node_slice, disk_order)`
/// enumeration order, a pure function of the bucket's node map.
pub struct Placement {
    xl_name: String,
    bucket: String,
    nodes: Arc<BTreeMap<String, Arc<dyn Node>>>,
}

impl Placement {
    pub fn new(
        xl_name: &str,
        bucket: &str,
        nodes: Arc<BTreeMap<String, Arc<dyn Node>>>,
    ) -> Self {
        Self {
            xl_name: xl_name.to_string(),
            bucket: bucket.to_string(),
            nodes,
        }
    }

    pub fn shard_path(
        &self,
        node_slice: usize,
        disk_order: usize,
        object: &str,
        stream_kind: &str,
    ) -> String {
        format!(
            "{}/{}${}${}/{}/{}",
            self.xl_name, self.bucket, node_slice, disk_order, object, stream_kind
        )
    }

    pub fn manifest_path(&self) -> String {
        format!("{}/{}", self.xl_name, BUCKET_METADATA_FILE)
    }

    /// All disks backing the bucket, in shard-index order.
    pub async fn disks(&self) -> Result<Vec<Arc<dyn Disk>>, StorageError> {
        let mut out = Vec::new();
        for node in self.nodes.values() {
            out.extend(node.list_disks().await?.into_values());
        }
        Ok(out)
    }

    /// One writer per disk, in shard-index order. A create failure purges
    /// the writers already opened and propagates immediately.
    pub async fn object_writers(
        &self,
        object: &str,
        stream_kind: &str,
    ) -> Result<Vec<Box<dyn ObjectWriter>>, StorageError> {
        let mut writers = Vec::new();
        for (node_slice, node) in self.nodes.values().enumerate() {
            for (disk_order, disk) in node.list_disks().await? {
                let path = self.shard_path(node_slice, disk_order, object, stream_kind);
                match disk.create(&path).await {
                    Ok(writer) => writers.push(writer),
                    Err(e) => {
                        cleanup_writers_on_error(&mut writers).await;
                        return Err(e);
                    }
                }
            }
        }
        Ok(writers)
    }

    /// One reader slot per disk, in shard-index order. An open failure is a
    /// soft failure recorded as a null slot; the shard-count threshold is
    /// evaluated by the caller.
    pub async fn object_readers(
        &self,
        object: &str,
        stream_kind: &str,
    ) -> Result<Vec<Option<DiskReader>>, StorageError> {
        let mut readers = Vec::new();
        for (node_slice, node) in self.nodes.values().enumerate() {
            for (disk_order, disk) in node.list_disks().await? {
                let path = self.shard_path(node_slice, disk_order, object, stream_kind);
                match disk.open(&path).await {
                    Ok(reader) => readers.push(Some(reader)),
                    Err(e) => {
                        tracing::debug!(%path, error = %e, "shard open failed, null slot");
                        readers.push(None);
                    }
                }
            }
        }
        Ok(readers)
    }

    /// Manifest replica readers across all disks of all nodes; disks whose
    /// replica cannot be opened are skipped.
    pub async fn manifest_readers(&self) -> Result<Vec<DiskReader>, StorageError> {
        let path = self.manifest_path();
        let mut readers = Vec::new();
        for disk in self.disks().await? {
            match disk.open(&path).await {
                Ok(reader) => readers.push(reader),
                Err(e) => {
                    tracing::debug!(%path, error = %e, "manifest replica open failed");
                }
            }
        }
        Ok(readers)
    }

    /// Manifest replica writers for every disk of every node.
    pub async fn manifest_writers(&self) -> Result<Vec<Box<dyn ObjectWriter>>, StorageError> {
        let path = self.manifest_path();
        let mut writers = Vec::new();
        for disk in self.disks().await? {
            match disk.create(&path).await {
                Ok(writer) => writers.push(writer),
                Err(e) => {
                    cleanup_writers_on_error(&mut writers).await;
                    return Err(e);
                }
            }
        }
        Ok(writers)
    }
}

/// Purge every writer opened so far; partial files must not be promoted
/// into the bucket's durable state.
pub async fn cleanup_writers_on_error(writers: &mut Vec<Box<dyn ObjectWriter>>) {
    for mut writer in writers.drain(..) {
        if let Err(e) = writer.purge().await {
            tracing::warn!(error = %e, "failed to purge abandoned writer");
        }
    }
}
