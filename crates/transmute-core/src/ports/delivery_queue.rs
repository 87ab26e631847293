//! DeliveryQueue port - 配送キュー
//!
//! DeliveryQueue は job_id のみを流します（状態や入力は JobStore / BlobStore）。
//! 同じ job_id が二回届いても、JobStore::claim が一度しか成功しないので
//! 変換は一回だけ実行されます。

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::ids::JobId;

pub use crate::domain::errors::QueueError;

#[async_trait]
pub trait DeliveryQueue: Send + Sync {
    async fn push(&self, job_id: JobId) -> Result<(), QueueError>;

    /// Wait up to `timeout` for the next job id. `Ok(None)` on timeout.
    async fn pop(&self, timeout: Duration) -> Result<Option<JobId>, QueueError>;

    async fn len(&self) -> usize;
}
