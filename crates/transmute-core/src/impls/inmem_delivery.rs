//! InMemoryDeliveryQueue - プロセス内の配送キュー
//!
//! # 実装詳細
//! - VecDeque<JobId> を tokio::sync::Mutex で保護
//! - push 時に Notify で待機中の pop を一つ起こす
//! - pop は deadline まで「通知待ち → 取り出し」を繰り返す

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::domain::ids::JobId;
use crate::ports::{DeliveryQueue, QueueError};

#[derive(Default)]
pub struct InMemoryDeliveryQueue {
    queue: Mutex<VecDeque<JobId>>,
    notify: Notify,
}

impl InMemoryDeliveryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeliveryQueue for InMemoryDeliveryQueue {
    async fn push(&self, job_id: JobId) -> Result<(), QueueError> {
        self.queue.lock().await.push_back(job_id);
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<JobId>, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            // 取り出しを試す前に登録しておくと、その間の push を取りこぼさない
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(job_id) = self.queue.lock().await.pop_front() {
                return Ok(Some(job_id));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }
}
