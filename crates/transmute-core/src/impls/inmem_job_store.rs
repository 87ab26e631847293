//! InMemoryJobStore - プロセス内のジョブ正本
//!
//! 全レコードを一つの tokio::sync::Mutex で保護します。claim / finish /
//! cancel / reap はすべてこのロックの中で `JobRecord` の遷移メソッドを
//! 呼ぶだけなので、同じジョブへの競合する書き込みは必ず直列化されます。

use std::collections::HashMap;
use std::collections::hash_map::Entry as MapEntry;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;

use crate::domain::blob::BlobInfo;
use crate::domain::errors::TransmuteError;
use crate::domain::ids::JobId;
use crate::domain::job::{JobRecord, JobStatus, Lease, StalePolicy, StatusCounts};
use crate::ports::{DownloadPin, JobStore, ReapAction, Reaped};

struct Entry {
    record: JobRecord,
    /// Cloned into every `DownloadPin`; a count above one means pinned.
    pin: Arc<()>,
}

impl Entry {
    fn is_pinned(&self) -> bool {
        Arc::strong_count(&self.pin) > 1
    }
}

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<JobId, Entry>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn with_record<T>(
        &self,
        id: &JobId,
        f: impl FnOnce(&mut JobRecord) -> Result<T, TransmuteError>,
    ) -> Result<T, TransmuteError> {
        let mut jobs = self.jobs.lock().await;
        let entry = jobs
            .get_mut(id)
            .ok_or_else(|| TransmuteError::job_not_found(*id))?;
        f(&mut entry.record)
    }

    /// Like `with_record`, but a missing job means the lease is gone.
    async fn with_lease<T>(
        &self,
        lease: Lease,
        f: impl FnOnce(&mut JobRecord) -> Result<T, TransmuteError>,
    ) -> Result<T, TransmuteError> {
        let mut jobs = self.jobs.lock().await;
        let entry = jobs
            .get_mut(&lease.job_id)
            .ok_or(TransmuteError::LeaseLost(lease.job_id))?;
        f(&mut entry.record)
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, record: JobRecord) -> Result<(), TransmuteError> {
        let mut jobs = self.jobs.lock().await;
        match jobs.entry(record.id) {
            MapEntry::Occupied(_) => Err(TransmuteError::DuplicateJob(record.id)),
            MapEntry::Vacant(slot) => {
                slot.insert(Entry {
                    record,
                    pin: Arc::new(()),
                });
                Ok(())
            }
        }
    }

    async fn get(&self, id: &JobId) -> Option<JobRecord> {
        let jobs = self.jobs.lock().await;
        jobs.get(id).map(|entry| entry.record.clone())
    }

    async fn claim(&self, id: &JobId, now: DateTime<Utc>) -> Option<(JobRecord, Lease)> {
        let mut jobs = self.jobs.lock().await;
        let entry = jobs.get_mut(id)?;
        let lease = entry.record.claim(now).ok()?;
        Some((entry.record.clone(), lease))
    }

    async fn heartbeat(&self, lease: Lease, now: DateTime<Utc>) -> Result<(), TransmuteError> {
        self.with_lease(lease, |record| record.heartbeat(lease, now))
            .await
    }

    async fn report_progress(
        &self,
        lease: Lease,
        progress: u8,
        now: DateTime<Utc>,
    ) -> Result<(), TransmuteError> {
        self.with_lease(lease, |record| record.report_progress(lease, progress, now))
            .await
    }

    async fn finish(
        &self,
        lease: Lease,
        output: BlobInfo,
        now: DateTime<Utc>,
    ) -> Result<(), TransmuteError> {
        self.with_lease(lease, |record| record.finish(lease, output, now))
            .await
    }

    async fn fail(
        &self,
        lease: Lease,
        error: String,
        now: DateTime<Utc>,
    ) -> Result<(), TransmuteError> {
        self.with_lease(lease, |record| record.fail(lease, error, now))
            .await
    }

    async fn cancel(&self, id: &JobId, now: DateTime<Utc>) -> Result<bool, TransmuteError> {
        self.with_record(id, |record| Ok(record.cancel(now))).await
    }

    async fn reap_stale(
        &self,
        now: DateTime<Utc>,
        stale_after: Duration,
        policy: StalePolicy,
    ) -> Vec<Reaped> {
        let mut jobs = self.jobs.lock().await;
        let mut reaped = Vec::new();
        for entry in jobs.values_mut() {
            let record = &mut entry.record;
            if !record.is_stale(stale_after, now) {
                continue;
            }
            let requeue = match policy {
                StalePolicy::Fail => false,
                StalePolicy::Requeue { max_attempts } => record.attempt() < max_attempts,
            };
            let (result, action) = if requeue {
                (record.requeue(now), ReapAction::Requeued)
            } else {
                (record.time_out(stale_after, now), ReapAction::Failed)
            };
            if result.is_ok() {
                reaped.push(Reaped {
                    job_id: record.id,
                    action,
                });
            }
        }
        reaped
    }

    async fn pin_output(&self, id: &JobId) -> Result<(JobRecord, DownloadPin), TransmuteError> {
        let jobs = self.jobs.lock().await;
        let entry = jobs
            .get(id)
            .ok_or_else(|| TransmuteError::job_not_found(*id))?;
        match entry.record.status() {
            JobStatus::Finished => Ok((
                entry.record.clone(),
                DownloadPin::new(entry.pin.clone()),
            )),
            status => Err(TransmuteError::NotReady(status)),
        }
    }

    async fn evict_expired(&self, now: DateTime<Utc>, retention: Duration) -> Vec<JobRecord> {
        let retention = TimeDelta::from_std(retention).unwrap_or(TimeDelta::MAX);
        let mut jobs = self.jobs.lock().await;
        let expired: Vec<JobId> = jobs
            .values()
            .filter(|entry| {
                entry.record.status().is_terminal()
                    && !entry.is_pinned()
                    && now - entry.record.updated_at() >= retention
            })
            .map(|entry| entry.record.id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| jobs.remove(&id))
            .map(|entry| entry.record)
            .collect()
    }

    async fn counts(&self) -> StatusCounts {
        let jobs = self.jobs.lock().await;
        let mut counts = StatusCounts::default();
        for entry in jobs.values() {
            counts.record(entry.record.status());
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::format::ConversionPair;
    use crate::domain::ids::BlobId;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use ulid::Ulid;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn blob() -> BlobInfo {
        BlobInfo {
            id: BlobId::from_ulid(Ulid::new()),
            size: 4,
        }
    }

    async fn seeded() -> (InMemoryJobStore, JobId) {
        let store = InMemoryJobStore::new();
        let id = JobId::from_ulid(Ulid::new());
        let record = JobRecord::new(id, "a.txt", ConversionPair::new("txt", "pdf"), blob(), t0());
        store.insert(record).await.unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_ids() {
        let (store, id) = seeded().await;
        let dup = JobRecord::new(id, "b.txt", ConversionPair::new("txt", "pdf"), blob(), t0());
        assert_matches!(store.insert(dup).await, Err(TransmuteError::DuplicateJob(_)));
    }

    #[tokio::test]
    async fn concurrent_claims_have_one_winner() {
        let (store, id) = seeded().await;
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.claim(&id, t0()).await }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn cancel_revokes_the_lease() {
        let (store, id) = seeded().await;
        let (_, lease) = store.claim(&id, t0()).await.unwrap();

        assert!(store.cancel(&id, t0()).await.unwrap());
        assert!(!store.cancel(&id, t0()).await.unwrap());

        assert_matches!(
            store.finish(lease, blob(), t0()).await,
            Err(TransmuteError::LeaseLost(_))
        );
        let record = store.get(&id).await.unwrap();
        assert_eq!(record.status(), JobStatus::Failed);
        assert!(record.output().is_none());
    }

    #[tokio::test]
    async fn cancel_unknown_job_is_not_found() {
        let store = InMemoryJobStore::new();
        let id = JobId::from_ulid(Ulid::new());
        assert_matches!(store.cancel(&id, t0()).await, Err(TransmuteError::NotFound(_)));
    }

    #[tokio::test]
    async fn reap_fail_policy_times_out() {
        let (store, id) = seeded().await;
        let (_, lease) = store.claim(&id, t0()).await.unwrap();
        let stale_after = Duration::from_secs(60);

        let reaped = store
            .reap_stale(t0() + TimeDelta::seconds(30), stale_after, StalePolicy::Fail)
            .await;
        assert!(reaped.is_empty());

        let reaped = store
            .reap_stale(t0() + TimeDelta::seconds(61), stale_after, StalePolicy::Fail)
            .await;
        assert_eq!(
            reaped,
            vec![Reaped {
                job_id: id,
                action: ReapAction::Failed
            }]
        );

        let record = store.get(&id).await.unwrap();
        assert!(record.error().unwrap().starts_with("WorkerTimeout"));
        assert_matches!(
            store.report_progress(lease, 50, t0()).await,
            Err(TransmuteError::LeaseLost(_))
        );
    }

    #[tokio::test]
    async fn heartbeat_keeps_a_silent_job_fresh() {
        let (store, id) = seeded().await;
        let stale_after = Duration::from_secs(60);
        let (_, lease) = store.claim(&id, t0()).await.unwrap();

        store.heartbeat(lease, t0() + TimeDelta::seconds(50)).await.unwrap();
        let reaped = store
            .reap_stale(t0() + TimeDelta::seconds(70), stale_after, StalePolicy::Fail)
            .await;
        assert!(reaped.is_empty());
        assert_eq!(store.get(&id).await.unwrap().status(), JobStatus::Processing);

        store.cancel(&id, t0() + TimeDelta::seconds(80)).await.unwrap();
        assert_matches!(
            store.heartbeat(lease, t0() + TimeDelta::seconds(90)).await,
            Err(TransmuteError::LeaseLost(_))
        );
    }

    #[tokio::test]
    async fn reap_requeue_policy_respects_max_attempts() {
        let (store, id) = seeded().await;
        let stale_after = Duration::from_secs(60);
        let policy = StalePolicy::Requeue { max_attempts: 2 };
        let late = t0() + TimeDelta::seconds(120);

        store.claim(&id, t0()).await.unwrap();
        let reaped = store.reap_stale(late, stale_after, policy).await;
        assert_eq!(reaped[0].action, ReapAction::Requeued);
        assert_eq!(store.get(&id).await.unwrap().status(), JobStatus::Queued);

        let (_, lease) = store.claim(&id, late).await.unwrap();
        assert_eq!(lease.attempt, 2);
        let reaped = store
            .reap_stale(late + TimeDelta::seconds(120), stale_after, policy)
            .await;
        assert_eq!(reaped[0].action, ReapAction::Failed);
        assert_eq!(store.get(&id).await.unwrap().status(), JobStatus::Failed);
    }

    #[tokio::test]
    async fn pin_output_requires_finished_job() {
        let (store, id) = seeded().await;
        assert_matches!(
            store.pin_output(&id).await,
            Err(TransmuteError::NotReady(JobStatus::Queued))
        );

        let (_, lease) = store.claim(&id, t0()).await.unwrap();
        let out = blob();
        store.finish(lease, out, t0()).await.unwrap();

        let (record, _pin) = store.pin_output(&id).await.unwrap();
        assert_eq!(record.output(), Some(&out));
    }

    #[tokio::test]
    async fn eviction_skips_pinned_and_fresh_jobs() {
        let (store, id) = seeded().await;
        let (_, lease) = store.claim(&id, t0()).await.unwrap();
        store.finish(lease, blob(), t0()).await.unwrap();
        let retention = Duration::from_secs(3600);
        let later = t0() + TimeDelta::hours(2);

        assert!(store.evict_expired(t0(), retention).await.is_empty());

        let (_, pin) = store.pin_output(&id).await.unwrap();
        assert!(store.evict_expired(later, retention).await.is_empty());
        assert!(store.get(&id).await.is_some());

        drop(pin);
        let evicted = store.evict_expired(later, retention).await;
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, id);
        assert!(store.get(&id).await.is_none());
    }

    #[tokio::test]
    async fn eviction_never_touches_live_jobs() {
        let (store, id) = seeded().await;
        let evicted = store
            .evict_expired(t0() + TimeDelta::days(30), Duration::from_secs(1))
            .await;
        assert!(evicted.is_empty());
        assert_eq!(store.counts().await.queued, 1);
        assert!(store.get(&id).await.is_some());
    }
}
