//! Job record and status management.
//!
//! `JobRecord` owns every invariant of a conversion job. Fields that take
//! part in an invariant are private and only change through the transition
//! methods below; the registry calls these methods under its lock.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::blob::BlobInfo;
use super::errors::TransmuteError;
use super::format::ConversionPair;
use super::ids::JobId;

/// Job status.
///
/// State transitions:
/// - Queued -> Processing -> Finished
/// - Queued -> Processing -> Failed
/// - Queued -> Failed (cancelled before a worker claimed it)
/// - Processing -> Queued (stale job re-queued, requeue policy only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Finished,
    Failed,
}

impl JobStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proof that a worker currently owns a job.
///
/// `attempt` is the claim counter at the time of the claim. Every write a
/// worker makes is checked against the record, so a worker whose job was
/// reaped, cancelled or re-claimed cannot touch it any more.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub job_id: JobId,
    pub attempt: u32,
}

/// What happens to a `processing` job that stopped reporting progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalePolicy {
    /// At-most-once: the job fails with `WorkerTimeout`.
    Fail,
    /// At-least-once: the job goes back to `queued` until `max_attempts`
    /// claims have been used, then fails with `WorkerTimeout`.
    Requeue { max_attempts: u32 },
}

/// Serializable progress view returned to pollers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub status: JobStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Number of jobs per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub queued: usize,
    pub processing: usize,
    pub finished: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Queued => self.queued += 1,
            JobStatus::Processing => self.processing += 1,
            JobStatus::Finished => self.finished += 1,
            JobStatus::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.queued + self.processing + self.finished + self.failed
    }
}

/// The unit of work: one uploaded file, one requested output format.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,

    /// Original upload filename.
    pub filename: String,

    pub pair: ConversionPair,

    /// The uploaded blob. Owned by the blob store.
    pub source: BlobInfo,

    pub created_at: DateTime<Utc>,

    status: JobStatus,
    progress: u8,
    output: Option<BlobInfo>,
    error: Option<String>,
    attempt: u32,

    /// Last state change or progress report; the heartbeat while processing.
    updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(
        id: JobId,
        filename: impl Into<String>,
        pair: ConversionPair,
        source: BlobInfo,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            filename: filename.into(),
            pair,
            source,
            created_at: now,
            status: JobStatus::Queued,
            progress: 0,
            output: None,
            error: None,
            attempt: 0,
            updated_at: now,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn output(&self) -> Option<&BlobInfo> {
        self.output.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            status: self.status,
            progress: self.progress,
            error: self.error.clone(),
        }
    }

    /// Filename offered to the client for the converted file:
    /// the upload's stem with the output extension.
    pub fn download_filename(&self) -> String {
        let base = self
            .filename
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.filename);
        let stem = match base.rsplit_once('.') {
            Some((stem, _)) => stem,
            None => base,
        };
        let stem: String = stem
            .chars()
            .filter(|c| !c.is_control() && *c != '"')
            .collect();
        if stem.trim().is_empty() {
            format!("converted-file-{}.{}", self.id, self.pair.target)
        } else {
            format!("{}.{}", stem, self.pair.target)
        }
    }

    /// Queued -> Processing. Starts a new attempt and returns its lease.
    pub fn claim(&mut self, now: DateTime<Utc>) -> Result<Lease, TransmuteError> {
        self.expect_status(JobStatus::Queued, JobStatus::Processing)?;
        self.attempt += 1;
        self.status = JobStatus::Processing;
        self.progress = 0;
        self.updated_at = now;
        Ok(Lease {
            job_id: self.id,
            attempt: self.attempt,
        })
    }

    /// Is `lease` still the owner of this job?
    pub fn check_lease(&self, lease: Lease) -> Result<(), TransmuteError> {
        if lease.job_id == self.id
            && lease.attempt == self.attempt
            && self.status == JobStatus::Processing
        {
            Ok(())
        } else {
            Err(TransmuteError::LeaseLost(lease.job_id))
        }
    }

    /// Refresh the staleness clock without touching progress.
    pub fn heartbeat(&mut self, lease: Lease, now: DateTime<Utc>) -> Result<(), TransmuteError> {
        self.check_lease(lease)?;
        self.updated_at = now;
        Ok(())
    }

    /// Record progress. Values are clamped to 99 (100 is reserved for
    /// `finish`) and never move backwards; every report refreshes the
    /// heartbeat.
    pub fn report_progress(
        &mut self,
        lease: Lease,
        progress: u8,
        now: DateTime<Utc>,
    ) -> Result<(), TransmuteError> {
        self.check_lease(lease)?;
        self.progress = self.progress.max(progress.min(99));
        self.updated_at = now;
        Ok(())
    }

    /// Processing -> Finished. The output blob must already be stored.
    pub fn finish(
        &mut self,
        lease: Lease,
        output: BlobInfo,
        now: DateTime<Utc>,
    ) -> Result<(), TransmuteError> {
        self.check_lease(lease)?;
        self.status = JobStatus::Finished;
        self.progress = 100;
        self.output = Some(output);
        self.updated_at = now;
        Ok(())
    }

    /// Processing -> Failed, on behalf of the worker holding `lease`.
    pub fn fail(
        &mut self,
        lease: Lease,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransmuteError> {
        self.check_lease(lease)?;
        self.mark_failed(error.into(), now);
        Ok(())
    }

    /// Queued/Processing -> Failed. Returns `false` (and changes nothing)
    /// if the job already reached a terminal state.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.mark_failed(TransmuteError::Cancelled.to_string(), now);
        true
    }

    /// Has this job been processing without a heartbeat for `stale_after`?
    pub fn is_stale(&self, stale_after: Duration, now: DateTime<Utc>) -> bool {
        let limit = TimeDelta::from_std(stale_after).unwrap_or(TimeDelta::MAX);
        self.status == JobStatus::Processing && now - self.updated_at >= limit
    }

    /// Processing -> Failed with `WorkerTimeout`.
    pub fn time_out(&mut self, stale_after: Duration, now: DateTime<Utc>) -> Result<(), TransmuteError> {
        self.expect_status(JobStatus::Processing, JobStatus::Failed)?;
        self.mark_failed(TransmuteError::WorkerTimeout(stale_after).to_string(), now);
        Ok(())
    }

    /// Processing -> Queued. The next claim starts a fresh attempt.
    pub fn requeue(&mut self, now: DateTime<Utc>) -> Result<(), TransmuteError> {
        self.expect_status(JobStatus::Processing, JobStatus::Queued)?;
        self.status = JobStatus::Queued;
        self.progress = 0;
        self.updated_at = now;
        Ok(())
    }

    fn mark_failed(&mut self, error: String, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.error = Some(error);
        self.updated_at = now;
    }

    fn expect_status(&self, expected: JobStatus, to: JobStatus) -> Result<(), TransmuteError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(TransmuteError::InvalidTransition {
                from: self.status,
                to,
            })
        }
    }
}
