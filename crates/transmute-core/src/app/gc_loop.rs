//! GcLoop - 保持期間を過ぎたジョブと blob の削除
//!
//! # フロー
//! 1. JobStore::evict_expired() で終了から `retention` 経過したジョブを削除
//!    （ダウンロード中で pin されているジョブは残る）
//! 2. 入力 blob と出力 blob を BlobStore から削除

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::context::AppContext;

pub struct GcLoop {
    ctx: AppContext,
}

impl GcLoop {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.ctx.config.gc_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.collect_once().await;
                }
            }
        }
    }

    /// Evict expired jobs and delete their blobs. Returns the number of
    /// jobs removed.
    pub async fn collect_once(&self) -> usize {
        let evicted = self
            .ctx
            .jobs
            .evict_expired(self.ctx.clock.now(), self.ctx.config.retention)
            .await;

        for record in &evicted {
            let blobs = std::iter::once(record.source).chain(record.output().copied());
            for blob in blobs {
                if let Err(err) = self.ctx.blobs.delete(&blob.id).await {
                    tracing::warn!(job_id = %record.id, blob_id = %blob.id, error = %err, "failed to delete blob");
                }
            }
            tracing::debug!(job_id = %record.id, status = %record.status(), "job evicted");
        }
        if !evicted.is_empty() {
            tracing::info!(count = evicted.len(), "expired jobs collected");
        }
        evicted.len()
    }
}
