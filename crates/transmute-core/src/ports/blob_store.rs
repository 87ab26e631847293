//! BlobStore port - 入力ファイル・変換結果の保存先
//!
//! アップロードも変換結果も同じ BlobStore に入ります。本体はストリームで
//! 受け渡しし、メモリに全体を載せないようにします。
//!
//! # 実装
//! - **InMemoryBlobStore**: テスト用
//! - **FsBlobStore**: ローカルディスク（本番用）

use std::io;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};

use crate::domain::blob::BlobInfo;
use crate::domain::ids::BlobId;

pub use crate::domain::errors::StorageError;

/// Byte stream used for uploads, converter output and downloads.
pub type ByteStream<'a> = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + 'a>>;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `body` under a fresh id.
    ///
    /// When `limit` is set and the body grows past it, nothing is kept and
    /// `StorageError::LimitExceeded` is returned. A failing body surfaces as
    /// `StorageError::Body`. The blob only becomes visible once complete.
    async fn put(&self, body: ByteStream<'_>, limit: Option<u64>) -> Result<BlobInfo, StorageError>;

    async fn get(&self, id: &BlobId) -> Result<ByteStream<'static>, StorageError>;

    /// Remove a blob. Deleting a missing blob is not an error.
    async fn delete(&self, id: &BlobId) -> Result<(), StorageError>;
}

/// Wrap an in-memory buffer as a single-chunk stream.
pub fn bytes_stream(data: impl Into<Bytes>) -> ByteStream<'static> {
    let data = data.into();
    Box::pin(futures::stream::once(async move { Ok(data) }))
}

/// Drain a stream into memory. Mostly for small payloads and tests.
pub async fn collect_bytes(mut stream: ByteStream<'_>) -> io::Result<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}
