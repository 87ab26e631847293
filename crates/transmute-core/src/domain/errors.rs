//! Errors - エラー型と分類
//!
//! - `TransmuteError`: 公開 API (Intake) とワーカーが返すドメインエラー
//! - `StorageError`: BlobStore の失敗
//! - `QueueError`: DeliveryQueue の失敗
//!
//! ジョブの `error` 文字列は `TransmuteError` の Display をそのまま使うので、
//! 先頭が種別名（`ConversionError:`, `WorkerTimeout:`, `Cancelled:`）になります。

use std::io;
use std::time::Duration;

use thiserror::Error;

use super::ids::{BlobId, JobId};
use super::job::JobStatus;

#[derive(Debug, Error)]
pub enum TransmuteError {
    #[error("UnsupportedFormat: {0}")]
    UnsupportedFormat(String),

    #[error("PayloadTooLarge: upload exceeds {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    #[error("NotFound: {0}")]
    NotFound(String),

    /// Download requested before the job finished.
    #[error("NotReady: job is {0}")]
    NotReady(JobStatus),

    #[error("ConversionError: {0}")]
    Conversion(String),

    #[error("WorkerTimeout: no progress for {}s", .0.as_secs())]
    WorkerTimeout(Duration),

    #[error("Cancelled: job was cancelled")]
    Cancelled,

    /// The caller no longer owns the job (reaped, cancelled or re-claimed).
    #[error("lease lost for {0}")]
    LeaseLost(JobId),

    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("InvalidUpload: {0}")]
    InvalidUpload(String),

    #[error("duplicate job id {0}")]
    DuplicateJob(JobId),

    #[error("StorageError: {0}")]
    Storage(#[from] StorageError),

    #[error("QueueError: {0}")]
    Queue(#[from] QueueError),
}

impl TransmuteError {
    pub fn job_not_found(id: JobId) -> Self {
        TransmuteError::NotFound(format!("job {id} does not exist"))
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("blob {0} not found")]
    NotFound(BlobId),

    #[error("blob exceeds limit of {limit} bytes")]
    LimitExceeded { limit: u64 },

    /// The incoming body stream failed (client disconnect, bad multipart).
    #[error("body stream failed: {0}")]
    Body(#[source] io::Error),

    #[error("storage I/O failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue operation failed: {0}")]
    OperationFailed(String),
}
