//! Intake - 受付・問い合わせ・ダウンロードの窓口
//!
//! # フロー（submit）
//! 1. output_format と拡張子から ConversionPair を決めて検証
//! 2. 本体を BlobStore にストリームで保存（上限超過なら何も残さない）
//! 3. JobRecord を queued で登録
//! 4. DeliveryQueue に job_id を push してすぐ返す
//!
//! 変換は待たない。結果は get_progress のポーリングで確認します。

use std::fmt;

use futures::StreamExt;

use crate::domain::blob::BlobInfo;
use crate::domain::errors::{StorageError, TransmuteError};
use crate::domain::format::{ConversionPair, Format};
use crate::domain::ids::JobId;
use crate::domain::job::{JobRecord, JobSnapshot, StatusCounts};
use crate::ports::ByteStream;

use super::context::AppContext;

/// A file upload with its requested output format.
pub struct Upload {
    pub filename: String,
    pub output_format: String,
    pub body: ByteStream<'static>,
}

/// An upload stored before its output format was known.
#[derive(Debug)]
#[must_use = "a staged upload must be submitted or discarded"]
pub struct StagedUpload {
    blob: BlobInfo,
}

impl StagedUpload {
    pub fn size(&self) -> u64 {
        self.blob.size
    }
}

/// A converted file ready to stream to the client.
pub struct Download {
    pub filename: String,
    pub content_type: &'static str,
    pub size: u64,
    /// Holds a download pin until dropped.
    pub body: ByteStream<'static>,
}

impl fmt::Debug for Download {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Download")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct Intake {
    ctx: AppContext,
}

impl Intake {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    /// Check that `filename` can be converted to `output_format`.
    pub fn validate(&self, filename: &str, output_format: &str) -> Result<ConversionPair, TransmuteError> {
        let target = Format::new(output_format);
        if target.as_str().is_empty() || !self.ctx.config.supported_formats.contains(&target) {
            return Err(TransmuteError::UnsupportedFormat(format!(
                "output format '{output_format}' is not supported"
            )));
        }
        let source = Format::from_filename(filename).ok_or_else(|| {
            TransmuteError::UnsupportedFormat(format!("cannot tell the format of '{filename}'"))
        })?;

        let pair = ConversionPair { source, target };
        if !self.ctx.converters.supports(&pair) {
            return Err(TransmuteError::UnsupportedFormat(format!(
                "cannot convert {} to {}",
                pair.source, pair.target
            )));
        }
        Ok(pair)
    }

    pub async fn submit(&self, upload: Upload) -> Result<JobId, TransmuteError> {
        let Upload {
            filename,
            output_format,
            body,
        } = upload;
        let pair = self.validate(&filename, &output_format)?;
        let staged = self.store_upload(body).await?;
        self.create_job(filename, pair, staged.blob).await
    }

    /// Store an upload whose output format is not known yet.
    ///
    /// The body may borrow from the request, e.g. a multipart field.
    pub async fn store_upload(&self, body: ByteStream<'_>) -> Result<StagedUpload, TransmuteError> {
        let limit = self.ctx.config.max_upload_bytes;
        let blob = self
            .ctx
            .blobs
            .put(body, Some(limit))
            .await
            .map_err(|err| match err {
                StorageError::LimitExceeded { limit } => TransmuteError::PayloadTooLarge { limit },
                StorageError::Body(err) => TransmuteError::InvalidUpload(err.to_string()),
                other => TransmuteError::Storage(other),
            })?;
        Ok(StagedUpload { blob })
    }

    /// Turn a staged upload into a job. On validation failure the staged
    /// blob is deleted.
    pub async fn submit_staged(
        &self,
        staged: StagedUpload,
        filename: String,
        output_format: &str,
    ) -> Result<JobId, TransmuteError> {
        match self.validate(&filename, output_format) {
            Ok(pair) => self.create_job(filename, pair, staged.blob).await,
            Err(err) => {
                self.discard(staged).await;
                Err(err)
            }
        }
    }

    pub async fn discard(&self, staged: StagedUpload) {
        if let Err(err) = self.ctx.blobs.delete(&staged.blob.id).await {
            tracing::warn!(blob_id = %staged.blob.id, error = %err, "failed to discard staged upload");
        }
    }

    async fn create_job(
        &self,
        filename: String,
        pair: ConversionPair,
        source: BlobInfo,
    ) -> Result<JobId, TransmuteError> {
        let now = self.ctx.clock.now();
        let id = self.ctx.ids.generate_job_id();
        let record = JobRecord::new(id, filename, pair.clone(), source, now);

        if let Err(err) = self.ctx.jobs.insert(record).await {
            let _ = self.ctx.blobs.delete(&source.id).await;
            return Err(err);
        }
        if let Err(err) = self.ctx.queue.push(id).await {
            // Nobody will ever pick it up; fail it so GC can clean up.
            tracing::error!(job_id = %id, error = %err, "failed to enqueue job");
            let _ = self.ctx.jobs.cancel(&id, now).await;
            return Err(err.into());
        }

        tracing::info!(job_id = %id, %pair, size = source.size, "job queued");
        Ok(id)
    }

    pub async fn get_progress(&self, id: &JobId) -> Result<JobSnapshot, TransmuteError> {
        self.ctx
            .jobs
            .get(id)
            .await
            .map(|record| record.snapshot())
            .ok_or_else(|| TransmuteError::job_not_found(*id))
    }

    /// Stream the output of a finished job.
    ///
    /// The returned body pins the job, so retention cannot delete the
    /// output while it is being read.
    pub async fn get_output(&self, id: &JobId) -> Result<Download, TransmuteError> {
        let (record, pin) = self.ctx.jobs.pin_output(id).await?;
        let Some(output) = record.output().copied() else {
            return Err(TransmuteError::NotReady(record.status()));
        };
        let body = self.ctx.blobs.get(&output.id).await?;
        let body = body.map(move |chunk| {
            let _pin = &pin;
            chunk
        });

        Ok(Download {
            filename: record.download_filename(),
            content_type: record.pair.target.content_type(),
            size: output.size,
            body: Box::pin(body),
        })
    }

    /// Cancel a queued or processing job. Terminal jobs are left as they are.
    pub async fn cancel(&self, id: &JobId) -> Result<JobSnapshot, TransmuteError> {
        if self.ctx.jobs.cancel(id, self.ctx.clock.now()).await? {
            tracing::info!(job_id = %id, "job cancelled");
        }
        self.get_progress(id).await
    }

    pub async fn counts(&self) -> StatusCounts {
        self.ctx.jobs.counts().await
    }

    /// Output formats clients may request.
    pub fn supported_formats(&self) -> Vec<String> {
        self.ctx
            .config
            .supported_formats
            .iter()
            .map(|format| format.to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::WorkerLoop;
    use crate::domain::job::JobStatus;
    use crate::ports::{DeliveryQueue, collect_bytes};
    use crate::testing::{Harness, upload};
    use assert_matches::assert_matches;
    use bytes::Bytes;
    use rstest::rstest;
    use std::io;
    use ulid::Ulid;

    #[tokio::test]
    async fn submit_queues_a_job() {
        let h = Harness::new();
        let id = h.submit("notes.txt", b"hello").await;

        let snapshot = h.intake.get_progress(&id).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Queued);
        assert_eq!(snapshot.progress, 0);
        assert_eq!(snapshot.error, None);
        assert_eq!(h.queue.len().await, 1);
        assert_eq!(h.blobs.len().await, 1);
    }

    #[rstest]
    #[case::unsupported_output("notes.txt", "pdf")]
    #[case::empty_output("notes.txt", "")]
    #[case::no_extension("README", "md")]
    #[case::no_converter("photo.xyz", "md")]
    #[tokio::test]
    async fn rejected_uploads_leave_nothing_behind(#[case] filename: &str, #[case] format: &str) {
        let h = Harness::new();
        let err = h.intake.submit(upload(filename, format, b"data")).await.unwrap_err();

        assert_matches!(err, TransmuteError::UnsupportedFormat(_));
        assert_eq!(h.intake.counts().await.total(), 0);
        assert_eq!(h.queue.len().await, 0);
        assert!(h.blobs.is_empty().await);
    }

    #[tokio::test]
    async fn output_format_is_normalized() {
        let h = Harness::new();
        h.intake.submit(upload("notes.TXT", ".MD", b"x")).await.unwrap();
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let h = Harness::new();
        let err = h
            .intake
            .submit(upload("big.txt", "md", &[b'x'; 2048]))
            .await
            .unwrap_err();

        assert_matches!(err, TransmuteError::PayloadTooLarge { limit: 1024 });
        assert_eq!(h.intake.counts().await.total(), 0);
        assert!(h.blobs.is_empty().await);
    }

    #[tokio::test]
    async fn broken_body_is_invalid_upload() {
        let h = Harness::new();
        let body: ByteStream<'static> = Box::pin(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(io::Error::new(io::ErrorKind::ConnectionAborted, "reset")),
        ]));
        let err = h
            .intake
            .submit(Upload {
                filename: "a.txt".into(),
                output_format: "md".into(),
                body,
            })
            .await
            .unwrap_err();
        assert_matches!(err, TransmuteError::InvalidUpload(_));
        assert!(h.blobs.is_empty().await);
    }

    #[tokio::test]
    async fn staged_upload_with_bad_format_is_deleted() {
        let h = Harness::new();
        let staged = h
            .intake
            .store_upload(crate::ports::bytes_stream("staged"))
            .await
            .unwrap();
        assert_eq!(staged.size(), 6);
        assert_eq!(h.blobs.len().await, 1);

        let err = h
            .intake
            .submit_staged(staged, "a.txt".into(), "docx")
            .await
            .unwrap_err();
        assert_matches!(err, TransmuteError::UnsupportedFormat(_));
        assert!(h.blobs.is_empty().await);
        assert_eq!(h.queue.len().await, 0);
    }

    #[tokio::test]
    async fn staged_upload_becomes_a_job() {
        let h = Harness::new();
        let staged = h
            .intake
            .store_upload(crate::ports::bytes_stream("staged"))
            .await
            .unwrap();
        let id = h.intake.submit_staged(staged, "a.txt".into(), "md").await.unwrap();
        assert_eq!(h.intake.get_progress(&id).await.unwrap().status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn unknown_jobs_are_not_found() {
        let h = Harness::new();
        let id = JobId::from_ulid(Ulid::new());

        assert_matches!(h.intake.get_progress(&id).await, Err(TransmuteError::NotFound(_)));
        assert_matches!(h.intake.get_output(&id).await, Err(TransmuteError::NotFound(_)));
        assert_matches!(h.intake.cancel(&id).await, Err(TransmuteError::NotFound(_)));
    }

    #[tokio::test]
    async fn download_before_finish_is_not_ready() {
        let h = Harness::new();
        let id = h.submit("a.txt", b"hello").await;
        assert_matches!(
            h.intake.get_output(&id).await,
            Err(TransmuteError::NotReady(JobStatus::Queued))
        );
    }

    #[tokio::test]
    async fn downloads_are_repeatable() {
        let h = Harness::new();
        let id = h.submit("dir/report.txt", b"hello").await;
        WorkerLoop::new(0, h.ctx.clone()).run_once().await.unwrap();

        let first = h.intake.get_output(&id).await.unwrap();
        assert_eq!(first.filename, "report.md");
        assert_eq!(first.content_type, "text/markdown; charset=utf-8");
        assert_eq!(first.size, 5);
        let first = collect_bytes(first.body).await.unwrap();

        let second = h.intake.get_output(&id).await.unwrap();
        let second = collect_bytes(second.body).await.unwrap();

        assert_eq!(&first[..], b"HELLO");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn cancel_queued_job() {
        let h = Harness::new();
        let id = h.submit("a.txt", b"hello").await;

        let snapshot = h.intake.cancel(&id).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert!(snapshot.error.as_deref().unwrap().starts_with("Cancelled"));

        // the queued id is still delivered, but nobody can claim it
        assert_eq!(WorkerLoop::new(0, h.ctx.clone()).run_once().await.unwrap(), Some(id));
        assert_eq!(h.echo.calls(), 0);
        assert_eq!(h.intake.cancel(&id).await.unwrap(), snapshot);
    }

    #[tokio::test]
    async fn cancel_finished_job_is_a_no_op() {
        let h = Harness::new();
        let id = h.submit("a.txt", b"hello").await;
        WorkerLoop::new(0, h.ctx.clone()).run_once().await.unwrap();

        let snapshot = h.intake.cancel(&id).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Finished);
        assert_eq!(snapshot.progress, 100);
    }
}
