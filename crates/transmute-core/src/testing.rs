//! Test doubles shared by the unit tests.
//!
//! Every double converts to `md`; the source extension picks the behavior:
//! `txt` echoes upper-cased, `bad` fails, `boom` panics, `slow` waits for a
//! gate, `hang` never finishes and never reports progress.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use tokio::sync::Notify;

use crate::app::{AppBuilder, AppContext, Intake, Upload};
use crate::config::ServiceConfig;
use crate::convert::{ConversionInput, ConvertError, Converter, ProgressReporter};
use crate::domain::format::{ConversionPair, Format};
use crate::domain::ids::JobId;
use crate::domain::job::{JobRecord, JobSnapshot, JobStatus};
use crate::impls::{InMemoryBlobStore, InMemoryDeliveryQueue, InMemoryJobStore};
use crate::ports::{ByteStream, FixedClock, JobStore, bytes_stream, collect_bytes};

fn pairs_of(pairs: &[(&str, &str)]) -> Vec<ConversionPair> {
    pairs
        .iter()
        .map(|(source, target)| ConversionPair::new(*source, *target))
        .collect()
}

/// Upper-cases its input and counts how often it ran.
pub(crate) struct EchoConverter {
    pairs: Vec<ConversionPair>,
    calls: AtomicUsize,
}

impl EchoConverter {
    pub(crate) fn new(pairs: &[(&str, &str)]) -> Self {
        Self {
            pairs: pairs_of(pairs),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Converter for EchoConverter {
    fn name(&self) -> &str {
        "echo"
    }

    fn pairs(&self) -> Vec<ConversionPair> {
        self.pairs.clone()
    }

    async fn convert(
        &self,
        input: ConversionInput,
        progress: ProgressReporter,
    ) -> Result<ByteStream<'static>, ConvertError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let data = collect_bytes(input.body).await?;
        progress.report(50);
        Ok(bytes_stream(data.to_ascii_uppercase()))
    }
}

struct FailingConverter;

#[async_trait]
impl Converter for FailingConverter {
    fn name(&self) -> &str {
        "failing"
    }

    fn pairs(&self) -> Vec<ConversionPair> {
        pairs_of(&[("bad", "md")])
    }

    async fn convert(
        &self,
        _input: ConversionInput,
        _progress: ProgressReporter,
    ) -> Result<ByteStream<'static>, ConvertError> {
        Err(ConvertError::Corrupt("not a real file".into()))
    }
}

struct PanickingConverter;

#[async_trait]
impl Converter for PanickingConverter {
    fn name(&self) -> &str {
        "panicking"
    }

    fn pairs(&self) -> Vec<ConversionPair> {
        pairs_of(&[("boom", "md")])
    }

    async fn convert(
        &self,
        _input: ConversionInput,
        _progress: ProgressReporter,
    ) -> Result<ByteStream<'static>, ConvertError> {
        panic!("converter exploded");
    }
}

/// Reports 10%, then waits until the gate is opened.
struct GateConverter {
    gate: Arc<Notify>,
}

#[async_trait]
impl Converter for GateConverter {
    fn name(&self) -> &str {
        "gate"
    }

    fn pairs(&self) -> Vec<ConversionPair> {
        pairs_of(&[("slow", "md")])
    }

    async fn convert(
        &self,
        input: ConversionInput,
        progress: ProgressReporter,
    ) -> Result<ByteStream<'static>, ConvertError> {
        let data = collect_bytes(input.body).await?;
        progress.report(10);
        self.gate.notified().await;
        progress.report(80);
        Ok(bytes_stream(data))
    }
}

/// Never reports progress and never finishes.
struct StallConverter;

#[async_trait]
impl Converter for StallConverter {
    fn name(&self) -> &str {
        "stall"
    }

    fn pairs(&self) -> Vec<ConversionPair> {
        pairs_of(&[("hang", "md")])
    }

    async fn convert(
        &self,
        _input: ConversionInput,
        _progress: ProgressReporter,
    ) -> Result<ByteStream<'static>, ConvertError> {
        std::future::pending().await
    }
}

pub(crate) fn test_config() -> ServiceConfig {
    ServiceConfig {
        max_upload_bytes: 1024,
        max_output_bytes: 1024,
        supported_formats: [Format::new("md")].into(),
        workers: 2,
        pop_timeout: Duration::from_millis(20),
        lease_check_interval: Duration::from_millis(10),
        ..ServiceConfig::default()
    }
}

pub(crate) struct Harness {
    pub ctx: AppContext,
    pub intake: Intake,
    pub jobs: Arc<InMemoryJobStore>,
    pub queue: Arc<InMemoryDeliveryQueue>,
    pub blobs: Arc<InMemoryBlobStore>,
    pub clock: Arc<FixedClock>,
    pub echo: Arc<EchoConverter>,
    pub gate: Arc<Notify>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_config(test_config())
    }

    pub(crate) fn with_config(config: ServiceConfig) -> Self {
        let jobs = Arc::new(InMemoryJobStore::new());
        let queue = Arc::new(InMemoryDeliveryQueue::new());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ));
        let echo = Arc::new(EchoConverter::new(&[("txt", "md")]));
        let gate = Arc::new(Notify::new());

        let app = AppBuilder::new(config)
            .register(echo.clone())
            .and_then(|b| b.register(Arc::new(FailingConverter)))
            .and_then(|b| b.register(Arc::new(PanickingConverter)))
            .and_then(|b| b.register(Arc::new(GateConverter { gate: gate.clone() })))
            .and_then(|b| b.register(Arc::new(StallConverter)))
            .unwrap()
            .job_store(jobs.clone())
            .delivery_queue(queue.clone())
            .blob_store(blobs.clone())
            .clock(clock.clone())
            .build()
            .unwrap();

        Self {
            ctx: app.context().clone(),
            intake: app.intake(),
            jobs,
            queue,
            blobs,
            clock,
            echo,
            gate,
        }
    }

    pub(crate) async fn submit(&self, filename: &str, data: &'static [u8]) -> JobId {
        self.intake.submit(upload(filename, "md", data)).await.unwrap()
    }

    /// Poll until the job satisfies `done`, failing the test after 5s.
    pub(crate) async fn wait_for(
        &self,
        id: &JobId,
        done: impl Fn(&JobSnapshot) -> bool,
    ) -> JobSnapshot {
        let poll = async {
            loop {
                let snapshot = self.intake.get_progress(id).await.unwrap();
                if done(&snapshot) {
                    return snapshot;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), poll)
            .await
            .expect("job did not reach the expected state")
    }

    pub(crate) async fn jobs_record(&self, id: &JobId) -> JobRecord {
        self.jobs.get(id).await.expect("job exists")
    }

    pub(crate) async fn wait_terminal(&self, id: &JobId) -> JobSnapshot {
        self.wait_for(id, |s| s.status.is_terminal()).await
    }

    pub(crate) async fn wait_status(&self, id: &JobId, status: JobStatus) -> JobSnapshot {
        self.wait_for(id, |s| s.status == status).await
    }
}

pub(crate) fn upload(filename: &str, output_format: &str, data: &'static [u8]) -> Upload {
    Upload {
        filename: filename.to_string(),
        output_format: output_format.to_string(),
        body: bytes_stream(Bytes::from_static(data)),
    }
}
