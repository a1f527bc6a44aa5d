use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use md5::Md5;
use sha2::{Digest, Sha256, Sha512};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::sync::{mpsc, Mutex};

use crate::observability::metrics;
use crate::storage::common::{is_md5_sum_equal, normalize_object_name, validate_object_name};
use crate::storage::disk::{DiskReader, ObjectWriter};
use crate::storage::erasure::{data_and_parity, Erasure};
use crate::storage::metadata::{BucketMetadata, ObjectMetadata, METADATA_VERSION};
use crate::storage::node::Node;
use crate::storage::placement::{cleanup_writers_on_error, Placement};
use crate::storage::{SignatureVerifier, StorageError, DATA_STREAM, OBJECT_METADATA_FILE};

/// Fixed chunk size for the encode pipeline. The final chunk of a stream
/// may be shorter.
pub const BLOCK_SIZE: usize = 10 * 1024 * 1024;

/// Decoded chunks buffered between the read producer and a slow consumer.
const READ_PIPE_DEPTH: usize = 4;

/// Copy granularity for the unencoded single-disk path.
const INLINE_COPY_BUF: usize = 256 * 1024;

/// A bucket: the unit of placement and catalog consistency. Cheap to clone;
/// clones share the node registry and the object-scope lock.
#[derive(Clone)]
pub struct Bucket {
    name: String,
    acl: String,
    created: DateTime<Utc>,
    xl_name: String,
    nodes: Arc<BTreeMap<String, Arc<dyn Node>>>,
    lock: Arc<Mutex<()>>,
}

/// One page of a bucket listing. `objects` is keyed by normalized name and
/// iterates in ascending order.
#[derive(Debug, Clone)]
pub struct ListObjectsResult {
    pub objects: BTreeMap<String, ObjectMetadata>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
}

/// Instantiate a bucket together with its initial manifest. Neither is
/// persisted yet; `save_bucket_metadata` commits the manifest to every disk.
pub fn new_bucket(
    bucket_name: &str,
    acl: &str,
    xl_name: &str,
    nodes: BTreeMap<String, Arc<dyn Node>>,
) -> Result<(Bucket, BucketMetadata), StorageError> {
    if bucket_name.trim().is_empty() || xl_name.trim().is_empty() {
        return Err(StorageError::InvalidArgument(
            "bucket name and xl name must be non-empty".into(),
        ));
    }
    let created = Utc::now();
    let bucket = Bucket {
        name: bucket_name.to_string(),
        acl: acl.to_string(),
        created,
        xl_name: xl_name.to_string(),
        nodes: Arc::new(nodes),
        lock: Arc::new(Mutex::new(())),
    };
    let manifest = BucketMetadata::new(bucket_name, acl, created);
    Ok((bucket, manifest))
}

impl Bucket {
    pub fn bucket_name(&self) -> &str {
        &self.name
    }

    pub fn acl(&self) -> &str {
        &self.acl
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    fn placement(&self) -> Placement {
        Placement::new(&self.xl_name, &self.name, Arc::clone(&self.nodes))
    }

    /// Persist the manifest to every disk.
    pub async fn save_bucket_metadata(&self, manifest: &BucketMetadata) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        self.store_manifest(manifest).await
    }

    /// Read the manifest; the first replica that decodes wins.
    pub async fn get_bucket_metadata(&self) -> Result<BucketMetadata, StorageError> {
        let _guard = self.lock.lock().await;
        self.load_manifest().await
    }

    #[tracing::instrument(skip(self), fields(bucket = %self.name, object = %object_name))]
    pub async fn get_object_metadata(
        &self,
        object_name: &str,
    ) -> Result<ObjectMetadata, StorageError> {
        let _guard = self.lock.lock().await;
        validate_object_name(object_name)?;
        let normalized = normalize_object_name(object_name);
        let manifest = self.load_manifest().await?;
        if !manifest.contains_object(&normalized) {
            return Err(StorageError::ObjectNotFound {
                bucket: self.name.clone(),
                object: object_name.to_string(),
            });
        }
        self.read_object_metadata(&normalized).await
    }

    /// List objects matching `prefix` strictly after `marker`. With a
    /// delimiter, names containing it past the prefix collapse into
    /// `common_prefixes`. `max_keys <= 0` defaults to 1000.
    #[tracing::instrument(skip(self), fields(bucket = %self.name))]
    pub async fn list_objects(
        &self,
        prefix: &str,
        marker: &str,
        delimiter: &str,
        max_keys: i64,
    ) -> Result<ListObjectsResult, StorageError> {
        let _guard = self.lock.lock().await;
        let start = std::time::Instant::now();
        let max_keys = if max_keys <= 0 { 1000 } else { max_keys as usize };
        let prefix = prefix.trim();
        let delimiter = delimiter.trim();
        let manifest = self.load_manifest().await?;

        let mut matching: BTreeSet<&str> = BTreeSet::new();
        for name in manifest.objects.keys().chain(manifest.multiparts.keys()) {
            if name.starts_with(prefix) && name.as_str() > marker {
                matching.insert(name.as_str());
            }
        }

        let mut results: BTreeSet<&str> = BTreeSet::new();
        let mut common_prefixes: BTreeSet<String> = BTreeSet::new();
        for name in matching {
            let trimmed = &name[prefix.len()..];
            if !delimiter.is_empty() {
                if let Some(idx) = trimmed.find(delimiter) {
                    common_prefixes.insert(format!("{prefix}{}{delimiter}", &trimmed[..idx]));
                    continue;
                }
            }
            results.insert(name);
        }

        let mut is_truncated = false;
        let mut objects = BTreeMap::new();
        for name in results {
            if objects.len() >= max_keys {
                is_truncated = true;
                break;
            }
            let meta = self.read_object_metadata(&normalize_object_name(name)).await?;
            objects.insert(name.to_string(), meta);
        }

        metrics::record_storage_op("list_objects", start.elapsed().as_secs_f64());
        Ok(ListObjectsResult {
            objects,
            common_prefixes: common_prefixes.into_iter().collect(),
            is_truncated,
        })
    }

    /// Write a new object from `stream`. The stream is chunked into
    /// `BLOCK_SIZE` blocks, each encoded into one shard per disk
    /// (chunk-sequential, shard-parallel), while MD5 and SHA-512 roll over
    /// the raw bytes. With a single disk the stream is stored inline,
    /// unencoded. Nothing becomes durable unless every step succeeds.
    #[tracing::instrument(
        skip(self, stream, metadata, signature),
        fields(bucket = %self.name, object = %object_name, declared_size = size)
    )]
    pub async fn write_object<R>(
        &self,
        object_name: &str,
        stream: &mut R,
        size: u64,
        expected_md5: &str,
        metadata: HashMap<String, String>,
        signature: Option<&dyn SignatureVerifier>,
    ) -> Result<ObjectMetadata, StorageError>
    where
        R: AsyncRead + Send + Unpin + ?Sized,
    {
        let _guard = self.lock.lock().await;
        let start = std::time::Instant::now();
        validate_object_name(object_name)?;
        let normalized = normalize_object_name(object_name);

        let mut writers = self.placement().object_writers(&normalized, DATA_STREAM).await?;

        let mut md5 = Md5::new();
        let mut sha512 = Sha512::new();
        let mut sha256 = signature.map(|_| Sha256::new());

        let summary = match write_object_data(
            &mut writers,
            stream,
            &mut md5,
            &mut sha512,
            sha256.as_mut(),
        )
        .await
        {
            Ok(summary) => summary,
            Err(e) => {
                cleanup_writers_on_error(&mut writers).await;
                return Err(e);
            }
        };
        if size > 0 && size != summary.total {
            tracing::debug!(declared = size, actual = summary.total, "declared size differs");
        }

        if let (Some(verifier), Some(sha256)) = (signature, sha256.take()) {
            let payload_sha256 = format!("{:x}", sha256.finalize());
            match verifier.verify(&payload_sha256).await {
                Ok(true) => {}
                Ok(false) => {
                    cleanup_writers_on_error(&mut writers).await;
                    return Err(StorageError::SignDoesNotMatch);
                }
                Err(e) => {
                    cleanup_writers_on_error(&mut writers).await;
                    return Err(e);
                }
            }
        }

        let obj = ObjectMetadata {
            version: METADATA_VERSION.to_string(),
            bucket: self.name.clone(),
            object: object_name.to_string(),
            created: Utc::now(),
            size: summary.total,
            block_size: summary.block_size,
            chunk_count: summary.chunk_count,
            data_disks: summary.data_disks,
            parity_disks: summary.parity_disks,
            md5_sum: format!("{:x}", md5.finalize()),
            sha512_sum: format!("{:x}", sha512.finalize()),
            metadata,
        };

        if !expected_md5.trim().is_empty() {
            if let Err(e) = is_md5_sum_equal(expected_md5, &obj.md5_sum) {
                cleanup_writers_on_error(&mut writers).await;
                return Err(e);
            }
        }

        if let Err(e) = self.write_object_metadata(&normalized, &obj).await {
            cleanup_writers_on_error(&mut writers).await;
            return Err(e);
        }

        // Promote into the catalog; readers key on the manifest entry.
        let promoted = async {
            let mut manifest = self.load_manifest().await?;
            manifest.insert_object(&normalized);
            self.store_manifest(&manifest).await
        }
        .await;
        if let Err(e) = promoted {
            cleanup_writers_on_error(&mut writers).await;
            return Err(e);
        }

        for writer in writers.iter_mut() {
            writer.close().await?;
        }

        metrics::record_storage_op("write_object", start.elapsed().as_secs_f64());
        metrics::increment_objects("write");
        tracing::debug!(
            size = obj.size,
            chunks = obj.chunk_count,
            data_disks = obj.data_disks,
            parity_disks = obj.parity_disks,
            "object written"
        );
        Ok(obj)
    }

    /// Open an object for reading. Returns the byte stream and the object's
    /// size immediately; a background task reconstructs chunks into a
    /// bounded pipe, so a slow consumer backpressures the shard reads. The
    /// stream fails with `ChecksumMismatch` after the last byte if the
    /// reconstructed content does not hash to the stored digests.
    #[tracing::instrument(skip(self), fields(bucket = %self.name, object = %object_name))]
    pub async fn read_object(
        &self,
        object_name: &str,
    ) -> Result<(ObjectReader, u64), StorageError> {
        let guard = self.lock.lock().await;
        validate_object_name(object_name)?;
        let normalized = normalize_object_name(object_name);
        let manifest = self.load_manifest().await?;
        if !manifest.contains_object(&normalized) {
            return Err(StorageError::ObjectNotFound {
                bucket: self.name.clone(),
                object: object_name.to_string(),
            });
        }
        let obj = self.read_object_metadata(&normalized).await?;
        let readers = self.placement().object_readers(&normalized, DATA_STREAM).await?;
        // Planning and metadata are done; the producer runs without the lock.
        drop(guard);

        let size = obj.size;
        let bucket_name = self.name.clone();
        let (tx, rx) = mpsc::channel(READ_PIPE_DEPTH);
        tokio::spawn(async move {
            produce_object_data(bucket_name, obj, readers, tx).await;
        });

        metrics::increment_objects("read");
        Ok((ObjectReader::new(rx), size))
    }

    /// Read the manifest without taking the lock; callers hold it.
    async fn load_manifest(&self) -> Result<BucketMetadata, StorageError> {
        let readers = self.placement().manifest_readers().await?;
        let mut last_err: Option<StorageError> = None;
        for mut reader in readers {
            let mut raw = Vec::new();
            match reader.read_to_end(&mut raw).await {
                Ok(_) => match serde_json::from_slice::<BucketMetadata>(&raw) {
                    Ok(manifest) => return Ok(manifest),
                    Err(e) => last_err = Some(e.into()),
                },
                Err(e) => last_err = Some(e.into()),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no manifest replica could be opened for bucket {}", self.name),
            ))
        }))
    }

    /// Write the manifest to every disk; any failure aborts and purges.
    async fn store_manifest(&self, manifest: &BucketMetadata) -> Result<(), StorageError> {
        let raw = serde_json::to_vec(manifest)?;
        let mut writers = self.placement().manifest_writers().await?;
        for writer in writers.iter_mut() {
            if let Err(e) = writer.write_all(&raw).await {
                cleanup_writers_on_error(&mut writers).await;
                return Err(e);
            }
        }
        for writer in writers.iter_mut() {
            writer.close().await?;
        }
        Ok(())
    }

    /// Load object metadata replicas; the first that decodes wins. All
    /// replicas unreadable surfaces the last decode error, none present at
    /// all is an absent object.
    async fn read_object_metadata(
        &self,
        normalized: &str,
    ) -> Result<ObjectMetadata, StorageError> {
        let readers = self
            .placement()
            .object_readers(normalized, OBJECT_METADATA_FILE)
            .await?;
        let mut last_err: Option<StorageError> = None;
        let mut opened = 0usize;
        for mut reader in readers.into_iter().flatten() {
            opened += 1;
            let mut raw = Vec::new();
            match reader.read_to_end(&mut raw).await {
                Ok(_) => match serde_json::from_slice::<ObjectMetadata>(&raw) {
                    Ok(obj) => return Ok(obj),
                    Err(e) => last_err = Some(e.into()),
                },
                Err(e) => last_err = Some(e.into()),
            }
        }
        let not_found = || StorageError::ObjectNotFound {
            bucket: self.name.clone(),
            object: normalized.to_string(),
        };
        if opened == 0 {
            return Err(not_found());
        }
        Err(last_err.unwrap_or_else(not_found))
    }

    /// Replicate object metadata to every disk.
    async fn write_object_metadata(
        &self,
        normalized: &str,
        obj: &ObjectMetadata,
    ) -> Result<(), StorageError> {
        let raw = serde_json::to_vec(obj)?;
        let mut writers = self
            .placement()
            .object_writers(normalized, OBJECT_METADATA_FILE)
            .await?;
        for writer in writers.iter_mut() {
            if let Err(e) = writer.write_all(&raw).await {
                cleanup_writers_on_error(&mut writers).await;
                return Err(e);
            }
        }
        for writer in writers.iter_mut() {
            writer.close().await?;
        }
        Ok(())
    }
}

struct WriteSummary {
    total: u64,
    chunk_count: usize,
    block_size: usize,
    data_disks: u8,
    parity_disks: u8,
}

async fn write_object_data<R>(
    writers: &mut Vec<Box<dyn ObjectWriter>>,
    stream: &mut R,
    md5: &mut Md5,
    sha512: &mut Sha512,
    mut sha256: Option<&mut Sha256>,
) -> Result<WriteSummary, StorageError>
where
    R: AsyncRead + Send + Unpin + ?Sized,
{
    // A single writer stores the stream inline, unencoded.
    if writers.len() == 1 {
        let mut buf = vec![0u8; INLINE_COPY_BUF];
        let mut total = 0u64;
        loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            md5.update(&buf[..n]);
            sha512.update(&buf[..n]);
            if let Some(h) = sha256.as_deref_mut() {
                h.update(&buf[..n]);
            }
            writers[0].write_all(&buf[..n]).await?;
            total += n as u64;
        }
        return Ok(WriteSummary {
            total,
            chunk_count: 0,
            block_size: 0,
            data_disks: 0,
            parity_disks: 0,
        });
    }

    let (k, m) = data_and_parity(writers.len())?;
    let erasure = Erasure::new(k as usize, m as usize)?;
    let mut block = vec![0u8; BLOCK_SIZE];
    let mut total = 0u64;
    let mut chunk_count = 0usize;
    loop {
        let filled = read_block(stream, &mut block).await?;
        if filled == 0 {
            break;
        }
        md5.update(&block[..filled]);
        sha512.update(&block[..filled]);
        if let Some(h) = sha256.as_deref_mut() {
            h.update(&block[..filled]);
        }
        let shards = erasure.encode(&block[..filled])?;
        dispatch_shards(writers, shards).await?;
        total += filled as u64;
        chunk_count += 1;
    }
    Ok(WriteSummary {
        total,
        chunk_count,
        block_size: BLOCK_SIZE,
        data_disks: k,
        parity_disks: m,
    })
}

/// Fill `block` from the stream; short only at EOF.
async fn read_block<R>(stream: &mut R, block: &mut [u8]) -> Result<usize, StorageError>
where
    R: AsyncRead + Send + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < block.len() {
        let n = stream.read(&mut block[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Fan one chunk's shards out to their writers in parallel. The chunk
/// completes only when every shard write has settled; the first failure is
/// reported after the join.
async fn dispatch_shards(
    writers: &mut Vec<Box<dyn ObjectWriter>>,
    shards: Vec<Vec<u8>>,
) -> Result<(), StorageError> {
    debug_assert_eq!(writers.len(), shards.len());
    let mut handles = Vec::with_capacity(writers.len());
    for (mut writer, shard) in writers.drain(..).zip(shards) {
        handles.push(tokio::spawn(async move {
            let result = writer.write_all(&shard).await;
            (writer, result)
        }));
    }
    let mut first_err = None;
    for handle in handles {
        match handle.await {
            Ok((writer, result)) => {
                writers.push(writer);
                if let Err(e) = result {
                    first_err.get_or_insert(e);
                }
            }
            Err(e) => {
                first_err.get_or_insert(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    e,
                )));
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Background producer for `read_object`: reconstructs the object chunk by
/// chunk into the pipe, then verifies the rolling hashes against the stored
/// digests. A dropped consumer is observed as a failed send and stops the
/// producer, releasing the shard readers.
async fn produce_object_data(
    bucket: String,
    obj: ObjectMetadata,
    mut readers: Vec<Option<DiskReader>>,
    tx: mpsc::Sender<Result<Bytes, StorageError>>,
) {
    let mut md5 = Md5::new();
    let mut sha512 = Sha512::new();

    if obj.data_disks == 0 {
        // Inline object: a single unencoded stream.
        let Some(mut reader) = readers.into_iter().flatten().next() else {
            let _ = tx
                .send(Err(StorageError::InsufficientShards {
                    available: 0,
                    required: 1,
                }))
                .await;
            return;
        };
        let mut buf = vec![0u8; INLINE_COPY_BUF];
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    let _ = tx.send(Err(e.into())).await;
                    return;
                }
            };
            md5.update(&buf[..n]);
            sha512.update(&buf[..n]);
            if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                return;
            }
        }
    } else {
        let erasure = match Erasure::new(obj.data_disks as usize, obj.parity_disks as usize) {
            Ok(erasure) => erasure,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        };
        let mut remaining = obj.size;
        for _ in 0..obj.chunk_count {
            let cur_block = remaining.min(obj.block_size as u64) as usize;
            let shard_len = erasure.encoded_shard_len(cur_block);
            let mut shards = read_chunk_shards(&mut readers, shard_len).await;
            let block = match erasure.decode(&mut shards, cur_block) {
                Ok(block) => block,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };
            md5.update(&block);
            sha512.update(&block);
            if tx.send(Ok(Bytes::from(block))).await.is_err() {
                return;
            }
            remaining -= cur_block as u64;
        }
    }

    let computed_md5 = format!("{:x}", md5.finalize());
    let computed_sha512 = format!("{:x}", sha512.finalize());
    if computed_md5 != obj.md5_sum || computed_sha512 != obj.sha512_sum {
        tracing::warn!(
            bucket = %bucket,
            object = %obj.object,
            "reconstructed content failed hash verification"
        );
        let _ = tx
            .send(Err(StorageError::ChecksumMismatch {
                bucket,
                object: obj.object,
            }))
            .await;
    }
}

/// Read exactly `shard_len` bytes from every live shard reader in parallel.
/// A failed or short read nulls that slot for this and later chunks.
async fn read_chunk_shards(
    readers: &mut [Option<DiskReader>],
    shard_len: usize,
) -> Vec<Option<Vec<u8>>> {
    let mut handles = Vec::with_capacity(readers.len());
    for slot in readers.iter_mut() {
        match slot.take() {
            Some(mut reader) => handles.push(Some(tokio::spawn(async move {
                let mut shard = vec![0u8; shard_len];
                match reader.read_exact(&mut shard).await {
                    Ok(_) => Ok((shard, reader)),
                    Err(e) => Err(e),
                }
            }))),
            None => handles.push(None),
        }
    }

    let mut shards = Vec::with_capacity(handles.len());
    for (idx, handle) in handles.into_iter().enumerate() {
        match handle {
            Some(handle) => match handle.await {
                Ok(Ok((shard, reader))) => {
                    readers[idx] = Some(reader);
                    shards.push(Some(shard));
                }
                Ok(Err(e)) => {
                    tracing::debug!(shard = idx, error = %e, "shard read failed, null slot");
                    shards.push(None);
                }
                Err(e) => {
                    tracing::debug!(shard = idx, error = %e, "shard read task aborted");
                    shards.push(None);
                }
            },
            None => shards.push(None),
        }
    }
    shards
}

/// Consumer end of the read pipe. Dropping it cancels the background
/// producer at its next pipe write.
pub struct ObjectReader {
    rx: mpsc::Receiver<Result<Bytes, StorageError>>,
    current: Bytes,
}

impl ObjectReader {
    fn new(rx: mpsc::Receiver<Result<Bytes, StorageError>>) -> Self {
        Self {
            rx,
            current: Bytes::new(),
        }
    }
}

impl AsyncRead for ObjectReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.current.is_empty() {
                let n = this.current.len().min(buf.remaining());
                let chunk = this.current.split_to(n);
                buf.put_slice(&chunk);
                return Poll::Ready(Ok(()));
            }
            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(Ok(bytes))) => this.current = bytes,
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        e,
                    )))
                }
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
