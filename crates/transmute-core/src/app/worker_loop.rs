//! WorkerLoop - 変換ジョブの実行ループ
//!
//! # フロー
//! 1. DeliveryQueue::pop() で job_id を取得
//! 2. JobStore::claim() で queued → processing（負けたら何もしない）
//! 3. 入力 blob を開き、ConverterRegistry から converter を引く
//! 4. converter の出力を BlobStore に保存しつつ、進捗を JobStore に転送
//! 5. 成功なら finish、失敗なら fail（lease を失っていたら何も書かない）
//!
//! 書き込みはすべて lease 付き。reaper やキャンセルで lease を失ったら
//! 変換を打ち切り、作った出力は消します。

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::convert::{ConversionInput, ConvertError, ProgressReporter};
use crate::domain::blob::BlobInfo;
use crate::domain::errors::{StorageError, TransmuteError};
use crate::domain::ids::JobId;
use crate::domain::job::{JobRecord, Lease};

use super::context::AppContext;

/// Worker group handle.
/// - `request_shutdown()` で新しいジョブの取得を止める
/// - `shutdown_and_join()` で全ワーカーの終了を待つ
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `n` workers sharing `ctx`.
    pub fn spawn(n: usize, ctx: AppContext) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let joins = (0..n)
            .map(|worker_id| {
                let worker = WorkerLoop::new(worker_id, ctx.clone());
                tokio::spawn(worker.run(shutdown_rx.clone()))
            })
            .collect();

        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    /// Stop taking new jobs. In-flight conversions run to completion.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(err) = join.await {
                tracing::error!(error = %err, "worker task ended abnormally");
            }
        }
    }
}

pub struct WorkerLoop {
    worker_id: usize,
    ctx: AppContext,
}

impl WorkerLoop {
    pub fn new(worker_id: usize, ctx: AppContext) -> Self {
        Self { worker_id, ctx }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        tracing::debug!(worker_id = self.worker_id, "worker started");
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            // shutdown と競合させるのは pop だけ。取り出したジョブは最後まで処理する
            let popped = tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                popped = self.ctx.queue.pop(self.ctx.config.pop_timeout) => popped,
            };

            match popped {
                Ok(Some(job_id)) => self.process(job_id).await,
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(worker_id = self.worker_id, error = %err, "queue pop failed");
                    tokio::time::sleep(self.ctx.config.pop_timeout).await;
                }
            }
        }
        tracing::debug!(worker_id = self.worker_id, "worker stopped");
    }

    /// Wait for one job id and process it. Returns the id, or `None` if the
    /// queue stayed empty for `pop_timeout`.
    #[cfg(test)]
    pub(crate) async fn run_once(&self) -> Result<Option<JobId>, crate::domain::errors::QueueError> {
        let Some(job_id) = self.ctx.queue.pop(self.ctx.config.pop_timeout).await? else {
            return Ok(None);
        };
        self.process(job_id).await;
        Ok(Some(job_id))
    }

    async fn process(&self, job_id: JobId) {
        let Some((record, lease)) = self.ctx.jobs.claim(&job_id, self.ctx.clock.now()).await else {
            tracing::debug!(worker_id = self.worker_id, %job_id, "job not claimable, skipping");
            return;
        };
        tracing::info!(
            worker_id = self.worker_id,
            %job_id,
            pair = %record.pair,
            attempt = lease.attempt,
            "job claimed"
        );

        match self.execute(&record, lease).await {
            Ok(output) => match self.ctx.jobs.finish(lease, output, self.ctx.clock.now()).await {
                Ok(()) => tracing::info!(
                    worker_id = self.worker_id,
                    %job_id,
                    size = output.size,
                    "job finished"
                ),
                Err(err) => {
                    tracing::warn!(worker_id = self.worker_id, %job_id, error = %err, "result dropped");
                    self.discard_output(&output).await;
                }
            },
            Err(TransmuteError::LeaseLost(_)) => {
                tracing::info!(worker_id = self.worker_id, %job_id, "lease lost, conversion abandoned");
            }
            Err(err) => {
                let message = err.to_string();
                match self.ctx.jobs.fail(lease, message, self.ctx.clock.now()).await {
                    Ok(()) => tracing::warn!(worker_id = self.worker_id, %job_id, error = %err, "job failed"),
                    Err(lost) => tracing::info!(
                        worker_id = self.worker_id,
                        %job_id,
                        error = %err,
                        reason = %lost,
                        "failure not recorded"
                    ),
                }
            }
        }
    }

    /// Convert and store the output. Progress is forwarded while the
    /// conversion runs, and every `lease_check_interval` the lease is
    /// confirmed and the heartbeat refreshed. Losing the lease drops the
    /// conversion future.
    async fn execute(&self, record: &JobRecord, lease: Lease) -> Result<BlobInfo, TransmuteError> {
        let converter = self.ctx.converters.resolve(&record.pair).ok_or_else(|| {
            TransmuteError::Conversion(format!("no converter for {}", record.pair))
        })?;
        let body = self.ctx.blobs.get(&record.source.id).await?;

        let (reporter, mut progress_rx) = ProgressReporter::channel();
        let input = ConversionInput {
            pair: record.pair.clone(),
            size: record.source.size,
            body,
        };
        let max_output = self.ctx.config.max_output_bytes;
        let blobs = self.ctx.blobs.clone();

        let pipeline = async move {
            let output = converter
                .convert(input, reporter)
                .await
                .map_err(conversion_error)?;
            blobs
                .put(output, Some(max_output))
                .await
                .map_err(output_error)
        };
        let pipeline = AssertUnwindSafe(pipeline).catch_unwind();
        tokio::pin!(pipeline);

        let mut lease_check = tokio::time::interval(self.ctx.config.lease_check_interval);
        lease_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        lease_check.tick().await;

        let mut progress_open = true;
        loop {
            tokio::select! {
                result = &mut pipeline => {
                    return result.unwrap_or_else(|panic| {
                        Err(TransmuteError::Conversion(format!(
                            "converter panicked: {}",
                            panic_message(panic.as_ref())
                        )))
                    });
                }
                changed = progress_rx.changed(), if progress_open => {
                    if changed.is_err() {
                        progress_open = false;
                        continue;
                    }
                    let progress = *progress_rx.borrow_and_update();
                    self.ctx
                        .jobs
                        .report_progress(lease, progress, self.ctx.clock.now())
                        .await?;
                }
                _ = lease_check.tick() => {
                    self.ctx.jobs.heartbeat(lease, self.ctx.clock.now()).await?;
                }
            }
        }
    }

    async fn discard_output(&self, output: &BlobInfo) {
        if let Err(err) = self.ctx.blobs.delete(&output.id).await {
            tracing::warn!(blob_id = %output.id, error = %err, "failed to delete orphaned output");
        }
    }
}

fn conversion_error(err: ConvertError) -> TransmuteError {
    TransmuteError::Conversion(err.to_string())
}

fn output_error(err: StorageError) -> TransmuteError {
    match err {
        StorageError::LimitExceeded { limit } => {
            TransmuteError::Conversion(format!("output exceeds {limit} bytes"))
        }
        StorageError::Body(err) => TransmuteError::Conversion(err.to_string()),
        other => TransmuteError::Storage(other),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
