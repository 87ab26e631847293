//! ReaperLoop - ハートビートが途切れたジョブの回収
//!
//! # フロー
//! 1. JobStore::reap_stale() で processing のまま `stale_after` 以上
//!    進捗がないジョブに StalePolicy を適用
//! 2. Requeued になったジョブは DeliveryQueue に再 push
//!
//! 元のワーカーの lease は無効になるので、そのワーカーが後から書き込もうと
//! しても LeaseLost で拒否されます。

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::ports::{ReapAction, Reaped};

use super::context::AppContext;

pub struct ReaperLoop {
    ctx: AppContext,
}

impl ReaperLoop {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.ctx.config.reaper_interval);
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
                    self.reap_once().await;
                }
            }
        }
    }

    pub async fn reap_once(&self) -> Vec<Reaped> {
        let config = &self.ctx.config;
        let reaped = self
            .ctx
            .jobs
            .reap_stale(self.ctx.clock.now(), config.stale_after, config.stale_policy)
            .await;

        for job in &reaped {
            match job.action {
                ReapAction::Failed => {
                    tracing::warn!(job_id = %job.job_id, "stale job failed with worker timeout");
                }
                ReapAction::Requeued => {
                    tracing::warn!(job_id = %job.job_id, "stale job re-queued");
                    if let Err(err) = self.ctx.queue.push(job.job_id).await {
                        tracing::error!(job_id = %job.job_id, error = %err, "failed to re-queue job");
                    }
                }
            }
        }
        reaped
    }
}
