// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! End-to-end engine tests over real filesystem disks:
//! - multi-chunk encode/decode round-trips
//! - reconstruction with disks removed, and the loss threshold
//! - shard corruption surfacing as a checksum failure
//! - building the disk layout from a TOML config

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use sha2::{Digest, Sha512};
use tempfile::TempDir;
use tokio::fs;
use tokio::io::AsyncReadExt;
use xlstore::storage::{new_bucket, Bucket, LocalDisk, LocalNode, Node, StorageError, BLOCK_SIZE};
use xlstore::Config;

const XL_NAME: &str = "xl-it";
const BUCKET: &str = "it-bucket";

/// Fixture owning the temp drives behind a bucket. Disks are spread over
/// two nodes when the count is even, one node otherwise.
struct EngineFixture {
    _tmp: TempDir,
    drives: Vec<PathBuf>,
    node_of_disk: Vec<(usize, usize)>,
    bucket: Bucket,
}

impl EngineFixture {
    async fn new(disk_count: usize) -> Self {
        let tmp = TempDir::new().unwrap();
        let mut drives = Vec::new();
        for i in 0..disk_count {
            drives.push(tmp.path().join(format!("drive{i}")));
        }

        let node_splits: Vec<&[PathBuf]> = if disk_count >= 2 && disk_count % 2 == 0 {
            vec![&drives[..disk_count / 2], &drives[disk_count / 2..]]
        } else {
            vec![&drives[..]]
        };

        let mut nodes: BTreeMap<String, Arc<dyn Node>> = BTreeMap::new();
        let mut node_of_disk = Vec::new();
        for (node_slice, chunk) in node_splits.iter().enumerate() {
            let mut disks: Vec<Arc<dyn xlstore::storage::Disk>> = Vec::new();
            for (disk_order, path) in chunk.iter().enumerate() {
                disks.push(Arc::new(LocalDisk::new(path).await.unwrap()));
                node_of_disk.push((node_slice, disk_order));
            }
            nodes.insert(
                format!("node-{node_slice}"),
                Arc::new(LocalNode::new(disks)),
            );
        }

        let (bucket, manifest) = new_bucket(BUCKET, "private", XL_NAME, nodes).unwrap();
        bucket.save_bucket_metadata(&manifest).await.unwrap();

        Self {
            _tmp: tmp,
            drives,
            node_of_disk,
            bucket,
        }
    }

    /// Physical path of the data shard that disk `disk_idx` carries.
    fn shard_file(&self, disk_idx: usize, object: &str) -> PathBuf {
        let (node_slice, disk_order) = self.node_of_disk[disk_idx];
        self.drives[disk_idx]
            .join(XL_NAME)
            .join(format!("{BUCKET}${node_slice}${disk_order}"))
            .join(object)
            .join("data")
    }

    async fn delete_shard(&self, disk_idx: usize, object: &str) {
        fs::remove_file(self.shard_file(disk_idx, object)).await.unwrap();
    }

    async fn corrupt_shard(&self, disk_idx: usize, object: &str) {
        let path = self.shard_file(disk_idx, object);
        let len = fs::metadata(&path).await.unwrap().len() as usize;
        fs::write(&path, vec![0xA5u8; len]).await.unwrap();
    }

    async fn put(&self, object: &str, data: &[u8]) -> xlstore::ObjectMetadata {
        let mut stream = data;
        self.bucket
            .write_object(object, &mut stream, data.len() as u64, "", HashMap::new(), None)
            .await
            .unwrap()
    }

    async fn get(&self, object: &str) -> Vec<u8> {
        let (mut reader, size) = self.bucket.read_object(object).await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out.len() as u64, size);
        out
    }

    async fn get_err(&self, object: &str) -> StorageError {
        let (mut reader, _size) = self.bucket.read_object(object).await.unwrap();
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();
        err.get_ref()
            .and_then(|e| e.downcast_ref::<StorageError>())
            .map(storage_error_kind)
            .expect("stream failure should carry a StorageError")
    }
}

/// Clone the variant shape for matching; StorageError itself is not Clone.
fn storage_error_kind(err: &StorageError) -> StorageError {
    match err {
        StorageError::InsufficientShards { available, required } => {
            StorageError::InsufficientShards {
                available: *available,
                required: *required,
            }
        }
        StorageError::ChecksumMismatch { bucket, object } => StorageError::ChecksumMismatch {
            bucket: bucket.clone(),
            object: object.clone(),
        },
        other => StorageError::InvalidArgument(other.to_string()),
    }
}

fn incrementing_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 256) as u8).collect()
}

#[tokio::test]
async fn four_disk_multi_chunk_roundtrip_with_two_disks_removed() {
    let fx = EngineFixture::new(4).await;
    let data = incrementing_bytes(25 * 1024 * 1024);

    let meta = fx.put("big-object", &data).await;
    assert_eq!(meta.data_disks, 2);
    assert_eq!(meta.parity_disks, 2);
    assert_eq!(meta.block_size, BLOCK_SIZE);
    assert_eq!(meta.block_size, 10_485_760);
    assert_eq!(meta.chunk_count, 3);
    assert_eq!(meta.size, 26_214_400);

    assert_eq!(fx.get("big-object").await, data);

    // Losing any floor(N/2) disks keeps the object readable.
    fx.delete_shard(1, "big-object").await;
    fx.delete_shard(3, "big-object").await;
    assert_eq!(fx.get("big-object").await, data);
}

#[tokio::test]
async fn five_disk_loss_threshold() {
    let fx = EngineFixture::new(5).await;
    let data = incrementing_bytes(1024 * 1024);
    let meta = fx.put("threshold", &data).await;
    assert_eq!(meta.data_disks, 3);
    assert_eq!(meta.parity_disks, 2);

    // m losses are fine.
    fx.delete_shard(0, "threshold").await;
    fx.delete_shard(2, "threshold").await;
    assert_eq!(fx.get("threshold").await, data);

    // One more loss crosses the threshold.
    fx.delete_shard(4, "threshold").await;
    let err = fx.get_err("threshold").await;
    assert!(matches!(
        err,
        StorageError::InsufficientShards { available: 2, required: 3 }
    ));
}

#[tokio::test]
async fn roundtrip_across_disk_counts() {
    for disk_count in [2usize, 3, 6, 8] {
        let fx = EngineFixture::new(disk_count).await;
        let data = incrementing_bytes(200_000);
        let meta = fx.put("obj", &data).await;
        assert_eq!(
            meta.data_disks as usize + meta.parity_disks as usize,
            disk_count,
            "k + m must cover all {disk_count} disks"
        );
        assert_eq!(fx.get("obj").await, data, "roundtrip with {disk_count} disks");

        // Any floor(N/2) losses stay readable.
        for disk_idx in 0..meta.parity_disks as usize {
            fx.delete_shard(disk_idx, "obj").await;
        }
        assert_eq!(fx.get("obj").await, data, "recovery with {disk_count} disks");
    }
}

#[tokio::test]
async fn corrupted_shard_fails_verification() {
    let fx = EngineFixture::new(4).await;
    let data = incrementing_bytes(3 * 1024 * 1024);
    fx.put("tainted", &data).await;

    // Same-length corruption decodes but cannot hash to the stored digests.
    fx.corrupt_shard(0, "tainted").await;
    let err = fx.get_err("tainted").await;
    assert!(matches!(err, StorageError::ChecksumMismatch { .. }));
}

#[tokio::test]
async fn stored_digests_match_content() {
    let fx = EngineFixture::new(4).await;
    let data = incrementing_bytes(123_457);
    let meta = fx.put("hashed", &data).await;

    assert_eq!(meta.sha512_sum, format!("{:x}", Sha512::digest(&data)));
    assert_eq!(meta.md5_sum.len(), 32);
    assert_eq!(meta.sha512_sum.len(), 128);
}

#[tokio::test]
async fn single_disk_large_inline_object() {
    let fx = EngineFixture::new(1).await;
    let data = incrementing_bytes(2 * 1024 * 1024);
    let meta = fx.put("inline", &data).await;

    assert_eq!(meta.data_disks, 0);
    assert_eq!(meta.parity_disks, 0);
    assert_eq!(meta.chunk_count, 0);
    assert_eq!(meta.size, data.len() as u64);
    assert_eq!(fx.get("inline").await, data);
}

#[tokio::test]
async fn listing_reflects_manifest_across_disks() {
    let fx = EngineFixture::new(4).await;
    for name in ["logs/2026/01", "logs/2026/02", "state"] {
        fx.put(name, b"entry").await;
    }

    let listing = fx
        .bucket
        .list_objects("logs-", "", "-", 0)
        .await
        .unwrap();
    assert_eq!(listing.common_prefixes, vec!["logs-2026-"]);
    assert!(listing.objects.is_empty());

    let listing = fx.bucket.list_objects("", "", "", 0).await.unwrap();
    assert_eq!(
        listing.objects.keys().cloned().collect::<Vec<_>>(),
        vec!["logs-2026-01", "logs-2026-02", "state"]
    );
}

#[tokio::test]
async fn config_built_layout_roundtrips() {
    let tmp = TempDir::new().unwrap();
    let config_toml = format!(
        r#"
        xl_name = "xl-cfg"

        [[nodes]]
        id = "node-0"
        drives = ["{0}/d0", "{0}/d1"]

        [[nodes]]
        id = "node-1"
        drives = ["{0}/d2"]
        "#,
        tmp.path().display()
    );
    let config_path = tmp.path().join("xlstore.toml");
    fs::write(&config_path, config_toml).await.unwrap();

    let cfg = Config::from_path(config_path.to_str().unwrap()).unwrap();
    let nodes = cfg.build_nodes().await.unwrap();
    assert_eq!(nodes.len(), 2);

    let (bucket, manifest) = new_bucket("cfg-bucket", &cfg.acl, &cfg.xl_name, nodes).unwrap();
    bucket.save_bucket_metadata(&manifest).await.unwrap();

    let data = incrementing_bytes(64 * 1024);
    let mut stream = data.as_slice();
    let meta = bucket
        .write_object("cfg-obj", &mut stream, data.len() as u64, "", HashMap::new(), None)
        .await
        .unwrap();
    assert_eq!(meta.data_disks, 2);
    assert_eq!(meta.parity_disks, 1);

    let (mut reader, size) = bucket.read_object("cfg-obj").await.unwrap();
    let mut out = Vec::new();
    reader.read_to_end(&mut out).await.unwrap();
    assert_eq!(size, data.len() as u64);
    assert_eq!(out, data);

    // The manifest replica sits on every drive of every node.
    for drive in ["d0", "d1", "d2"] {
        let replica = tmp.path().join(drive).join("xl-cfg").join("bucket_metadata.json");
        assert!(replica.exists(), "missing manifest replica on {drive}");
    }
}

#[tokio::test]
async fn dropped_reader_stops_the_producer() {
    let fx = EngineFixture::new(4).await;
    let data = incrementing_bytes(12 * 1024 * 1024);
    fx.put("abandoned", &data).await;

    let (mut reader, _size) = fx.bucket.read_object("abandoned").await.unwrap();
    let mut first = vec![0u8; 1024];
    reader.read_exact(&mut first).await.unwrap();
    assert_eq!(&first, &data[..1024]);
    drop(reader);

    // The bucket stays fully usable afterwards.
    assert_eq!(fx.get("abandoned").await, data);
}
