//! JobStore port - ジョブレコードの正本
//!
//! JobStore はジョブ状態の唯一の source of truth です。状態遷移は
//! `JobRecord` のメソッドで行い、ストアはそれをアトミックに適用します。
//! ワーカーからの書き込みはすべて `Lease` 付きで、リースを失ったワーカーの
//! 書き込みは `TransmuteError::LeaseLost` で拒否されます。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::blob::BlobInfo;
use crate::domain::errors::TransmuteError;
use crate::domain::ids::JobId;
use crate::domain::job::{JobRecord, Lease, StalePolicy, StatusCounts};

/// What the reaper did to a stale job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapAction {
    Failed,
    Requeued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reaped {
    pub job_id: JobId,
    pub action: ReapAction,
}

/// Keeps a finished job's output alive while a download is streaming.
///
/// Retention eviction skips a job while any pin for it exists.
#[derive(Debug, Clone)]
pub struct DownloadPin(Arc<()>);

impl DownloadPin {
    pub fn new(token: Arc<()>) -> Self {
        Self(token)
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Register a new job. Fails with `DuplicateJob` if the id is taken.
    async fn insert(&self, record: JobRecord) -> Result<(), TransmuteError>;

    async fn get(&self, id: &JobId) -> Option<JobRecord>;

    /// Atomically move a queued job to processing.
    ///
    /// Returns `None` when the job is missing or not queued, which makes
    /// duplicate deliveries harmless.
    async fn claim(&self, id: &JobId, now: DateTime<Utc>) -> Option<(JobRecord, Lease)>;

    /// Confirm `lease` still owns the job and refresh its `updated_at`.
    async fn heartbeat(&self, lease: Lease, now: DateTime<Utc>) -> Result<(), TransmuteError>;

    async fn report_progress(
        &self,
        lease: Lease,
        progress: u8,
        now: DateTime<Utc>,
    ) -> Result<(), TransmuteError>;

    async fn finish(
        &self,
        lease: Lease,
        output: BlobInfo,
        now: DateTime<Utc>,
    ) -> Result<(), TransmuteError>;

    async fn fail(&self, lease: Lease, error: String, now: DateTime<Utc>)
    -> Result<(), TransmuteError>;

    /// Fail a queued or processing job as cancelled.
    ///
    /// `Ok(false)` if it was already terminal; `NotFound` if unknown.
    async fn cancel(&self, id: &JobId, now: DateTime<Utc>) -> Result<bool, TransmuteError>;

    /// Apply `policy` to every processing job whose heartbeat is older than
    /// `stale_after`.
    async fn reap_stale(
        &self,
        now: DateTime<Utc>,
        stale_after: Duration,
        policy: StalePolicy,
    ) -> Vec<Reaped>;

    /// Look up a finished job and pin it against eviction.
    ///
    /// `NotFound` for unknown ids, `NotReady` for jobs that are not finished.
    async fn pin_output(&self, id: &JobId) -> Result<(JobRecord, DownloadPin), TransmuteError>;

    /// Remove terminal jobs older than `retention` that are not pinned and
    /// return them so their blobs can be deleted.
    async fn evict_expired(&self, now: DateTime<Utc>, retention: Duration) -> Vec<JobRecord>;

    async fn counts(&self) -> StatusCounts;
}
