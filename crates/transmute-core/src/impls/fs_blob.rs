//! FsBlobStore - ローカルディスクの BlobStore
//!
//! # 書き込みの流れ
//! 1. `<root>/<blob-id>.part` にストリームを書き込む
//! 2. 上限を超えた・本体が失敗した場合は `.part` を消してエラー
//! 3. 完了したら `<root>/<blob-id>` に rename（ここで初めて見える）
//!
//! put の future が途中で drop されても `.part` は `PartFile` の Drop で消えます。

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use ulid::Ulid;

use crate::domain::blob::BlobInfo;
use crate::domain::ids::BlobId;
use crate::ports::{BlobStore, ByteStream, StorageError};

const PART_SUFFIX: &str = ".part";

pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open (and create if needed) a store rooted at `root`.
    ///
    /// Leftover `.part` files from an interrupted run are removed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;

        let mut entries = fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().ends_with(PART_SUFFIX) {
                let _ = fs::remove_file(entry.path()).await;
            }
        }

        tracing::debug!(root = %root.display(), "blob store opened");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, id: &BlobId) -> PathBuf {
        self.root.join(id.to_string())
    }
}

/// Removes the partial file unless `commit` ran.
struct PartFile {
    path: PathBuf,
    committed: bool,
}

impl PartFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            committed: false,
        }
    }

    async fn commit(mut self, dest: &Path) -> io::Result<()> {
        fs::rename(&self.path, dest).await?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, mut body: ByteStream<'_>, limit: Option<u64>) -> Result<BlobInfo, StorageError> {
        let id = BlobId::from_ulid(Ulid::new());
        let dest = self.path_of(&id);
        let part = PartFile::new(self.root.join(format!("{id}{PART_SUFFIX}")));

        let mut file = File::create(&part.path).await?;
        let mut size: u64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(StorageError::Body)?;
            size += chunk.len() as u64;
            if let Some(limit) = limit
                && size > limit
            {
                return Err(StorageError::LimitExceeded { limit });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        part.commit(&dest).await?;
        Ok(BlobInfo { id, size })
    }

    async fn get(&self, id: &BlobId) -> Result<ByteStream<'static>, StorageError> {
        match File::open(self.path_of(id)).await {
            Ok(file) => Ok(Box::pin(ReaderStream::new(file))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(StorageError::NotFound(*id)),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, id: &BlobId) -> Result<(), StorageError> {
        match fs::remove_file(self.path_of(id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
