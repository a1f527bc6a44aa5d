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

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::RwLock;

use crate::storage::StorageError;

const WRITE_BUF_CAPACITY: usize = 256 * 1024;
const READ_BUF_CAPACITY: usize = 64 * 1024;

pub type DiskReader = Box<dyn AsyncRead + Send + Unpin>;

/// One storage volume. Paths use forward-slash separators; the
/// implementation supplies the physical prefix.
#[async_trait]
pub trait Disk: Send + Sync {
    async fn open(&self, path: &str) -> Result<DiskReader, StorageError>;
    async fn create(&self, path: &str) -> Result<Box<dyn ObjectWriter>, StorageError>;
}

/// A shard or metadata writer. `close` commits what was written; `purge`
/// abandons the writer and removes anything already on the volume, so a
/// failed operation cannot promote partial files.
#[async_trait]
pub trait ObjectWriter: Send {
    async fn write_all(&mut self, buf: &[u8]) -> Result<(), StorageError>;
    async fn close(&mut self) -> Result<(), StorageError>;
    async fn purge(&mut self) -> Result<(), StorageError>;
}

/// Filesystem-backed disk rooted at one directory.
#[derive(Debug, Clone)]
pub struct LocalDisk {
    root: PathBuf,
}

impl LocalDisk {
    pub async fn new<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        fs::create_dir_all(root.as_ref()).await?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
        })
    }

    fn physical(&self, path: &str) -> PathBuf {
        let mut full = self.root.clone();
        for comp in path.split('/').filter(|c| !c.is_empty()) {
            full.push(comp);
        }
        full
    }
}

#[async_trait]
impl Disk for LocalDisk {
    async fn open(&self, path: &str) -> Result<DiskReader, StorageError> {
        let file = fs::File::open(self.physical(path)).await?;
        Ok(Box::new(BufReader::with_capacity(READ_BUF_CAPACITY, file)))
    }

    async fn create(&self, path: &str) -> Result<Box<dyn ObjectWriter>, StorageError> {
        let physical = self.physical(path);
        if let Some(parent) = physical.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = fs::File::create(&physical).await?;
        Ok(Box::new(LocalWriter {
            inner: Some(BufWriter::with_capacity(WRITE_BUF_CAPACITY, file)),
            path: physical,
        }))
    }
}

struct LocalWriter {
    inner: Option<BufWriter<fs::File>>,
    path: PathBuf,
}

#[async_trait]
impl ObjectWriter for LocalWriter {
    async fn write_all(&mut self, buf: &[u8]) -> Result<(), StorageError> {
        let writer = self.inner.as_mut().ok_or_else(|| {
            StorageError::InvalidArgument("write on a closed writer".into())
        })?;
        writer.write_all(buf).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        if let Some(mut writer) = self.inner.take() {
            writer.flush().await?;
            writer.into_inner().sync_all().await?;
        }
        Ok(())
    }

    async fn purge(&mut self) -> Result<(), StorageError> {
        self.inner = None;
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory disk. Backs unit tests and embedded deployments the same way
/// `LocalDisk` backs real volumes: `create` truncates immediately, `close`
/// commits the staged bytes, `purge` removes the file.
#[derive(Debug, Clone, Default)]
pub struct MemDisk {
    files: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemDisk {
    pub fn new() -> Self {
        Self::default()
    }

    fn canonical(path: &str) -> String {
        path.split('/')
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Committed contents of a file, if present.
    pub async fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.files.read().await.get(&Self::canonical(path)).cloned()
    }

    /// Drop a file, simulating shard loss.
    pub async fn remove(&self, path: &str) -> bool {
        self.files.write().await.remove(&Self::canonical(path)).is_some()
    }

    /// Overwrite a file in place, simulating corruption.
    pub async fn tamper(&self, path: &str, contents: Vec<u8>) {
        self.files
            .write()
            .await
            .insert(Self::canonical(path), contents);
    }

    pub async fn file_count(&self) -> usize {
        self.files.read().await.len()
    }
}

#[async_trait]
impl Disk for MemDisk {
    async fn open(&self, path: &str) -> Result<DiskReader, StorageError> {
        let contents = self
            .files
            .read()
            .await
            .get(&Self::canonical(path))
            .cloned()
            .ok_or_else(|| {
                StorageError::Io(std::io::Error::new(
                    ErrorKind::NotFound,
                    format!("no such file: {path}"),
                ))
            })?;
        Ok(Box::new(std::io::Cursor::new(contents)))
    }

    async fn create(&self, path: &str) -> Result<Box<dyn ObjectWriter>, StorageError> {
        let key = Self::canonical(path);
        self.files.write().await.insert(key.clone(), Vec::new());
        Ok(Box::new(MemWriter {
            files: Arc::clone(&self.files),
            key,
            staged: Vec::new(),
            done: false,
        }))
    }
}

struct MemWriter {
    files: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    key: String,
    staged: Vec<u8>,
    done: bool,
}

#[async_trait]
impl ObjectWriter for MemWriter {
    async fn write_all(&mut self, buf: &[u8]) -> Result<(), StorageError> {
        if self.done {
            return Err(StorageError::InvalidArgument(
                "write on a closed writer".into(),
            ));
        }
        self.staged.extend_from_slice(buf);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        if !self.done {
            self.done = true;
            self.files
                .write()
                .await
                .insert(self.key.clone(), std::mem::take(&mut self.staged));
        }
        Ok(())
    }

    async fn purge(&mut self) -> Result<(), StorageError> {
        self.done = true;
        self.staged.clear();
        self.files.write().await.remove(&self.key);
        Ok(())
    }
}
