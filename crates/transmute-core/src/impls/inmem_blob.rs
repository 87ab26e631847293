//! InMemoryBlobStore - テスト用の BlobStore

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::domain::blob::BlobInfo;
use crate::domain::ids::BlobId;
use crate::ports::{BlobStore, ByteStream, StorageError, bytes_stream};

#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: Mutex<HashMap<BlobId, Bytes>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.lock().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, mut body: ByteStream<'_>, limit: Option<u64>) -> Result<BlobInfo, StorageError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(StorageError::Body)?;
            buf.extend_from_slice(&chunk);
            if let Some(limit) = limit
                && buf.len() as u64 > limit
            {
                return Err(StorageError::LimitExceeded { limit });
            }
        }

        let id = BlobId::from_ulid(Ulid::new());
        let size = buf.len() as u64;
        self.blobs.lock().await.insert(id, buf.freeze());
        Ok(BlobInfo { id, size })
    }

    async fn get(&self, id: &BlobId) -> Result<ByteStream<'static>, StorageError> {
        let blobs = self.blobs.lock().await;
        let data = blobs.get(id).cloned().ok_or(StorageError::NotFound(*id))?;
        Ok(bytes_stream(data))
    }

    async fn delete(&self, id: &BlobId) -> Result<(), StorageError> {
        self.blobs.lock().await.remove(id);
        Ok(())
    }
}
