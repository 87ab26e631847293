//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - `ServiceConfig::validate()` を build() 時に実行
//! - supported_formats の各出力形式に、少なくとも一つ converter が
//!   登録されていることを build() 時にチェック
//! - 不足があれば BuildError を返す（起動してから 400 を返し続けるより良い）

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{ConfigError, ServiceConfig};
use crate::convert::{
    Converter, ConverterRegistry, FfmpegConverter, ImageConverter, RegistryError, TextToPdf,
};
use crate::impls::{InMemoryBlobStore, InMemoryDeliveryQueue, InMemoryJobStore};
use crate::ports::{BlobStore, Clock, DeliveryQueue, IdGenerator, JobStore, SystemClock, UlidGenerator};

use super::context::AppContext;
use super::gc_loop::GcLoop;
use super::intake::Intake;
use super::reaper_loop::ReaperLoop;
use super::worker_loop::WorkerPool;

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new(config)
///     .with_builtin_converters()?
///     .blob_store(Arc::new(FsBlobStore::open("./data").await?))
///     .build()?;
/// let handle = app.start();
/// ```
///
/// 指定しなかったポートはインメモリ実装（時計は SystemClock）になります。
pub struct AppBuilder {
    config: ServiceConfig,
    registry: ConverterRegistry,
    blobs: Option<Arc<dyn BlobStore>>,
    jobs: Option<Arc<dyn JobStore>>,
    queue: Option<Arc<dyn DeliveryQueue>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no converter produces these supported formats: {0:?}")]
    MissingConverters(Vec<String>),

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

impl AppBuilder {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            registry: ConverterRegistry::new(),
            blobs: None,
            jobs: None,
            queue: None,
            clock: None,
            ids: None,
        }
    }

    pub fn register(mut self, converter: Arc<dyn Converter>) -> Result<Self, RegistryError> {
        self.registry.register(converter)?;
        Ok(self)
    }

    /// Register the converters that need no external tools.
    pub fn with_builtin_converters(self) -> Result<Self, RegistryError> {
        self.register(Arc::new(TextToPdf::new()))?
            .register(Arc::new(ImageConverter::new()))
    }

    /// Register the ffmpeg-backed audio/video converter.
    pub fn with_ffmpeg(self, program: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        self.register(Arc::new(FfmpegConverter::new(program)))
    }

    pub fn blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    pub fn job_store(mut self, jobs: Arc<dyn JobStore>) -> Self {
        self.jobs = Some(jobs);
        self
    }

    pub fn delivery_queue(mut self, queue: Arc<dyn DeliveryQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// # 検証
    /// - 設定値（ワーカー数・タイマー・上限）
    /// - supported_formats ⊆ 登録済み converter の出力形式
    pub fn build(self) -> Result<App, BuildError> {
        self.config.validate()?;

        let targets = self.registry.targets();
        let missing: Vec<String> = self
            .config
            .supported_formats
            .iter()
            .filter(|format| !targets.contains(*format))
            .map(|format| format.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(BuildError::MissingConverters(missing));
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())));

        let ctx = AppContext {
            config: Arc::new(self.config),
            jobs: self.jobs.unwrap_or_else(|| Arc::new(InMemoryJobStore::new())),
            queue: self.queue.unwrap_or_else(|| Arc::new(InMemoryDeliveryQueue::new())),
            blobs: self.blobs.unwrap_or_else(|| Arc::new(InMemoryBlobStore::new())),
            converters: Arc::new(self.registry),
            clock,
            ids,
        };
        Ok(App { ctx })
    }
}

/// A wired application that has not started its background tasks yet.
pub struct App {
    ctx: AppContext,
}

impl App {
    /// Intake over this app. Jobs submitted before `start` stay queued.
    pub fn intake(&self) -> Intake {
        Intake::new(self.ctx.clone())
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    /// Spawn the worker pool, reaper and GC loops.
    pub fn start(self) -> AppHandle {
        let config = &self.ctx.config;
        let workers = WorkerPool::spawn(config.workers, self.ctx.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let loops = vec![
            tokio::spawn(ReaperLoop::new(self.ctx.clone()).run(shutdown_rx.clone())),
            tokio::spawn(GcLoop::new(self.ctx.clone()).run(shutdown_rx)),
        ];

        tracing::info!(
            workers = config.workers,
            formats = ?self.intake().supported_formats(),
            stale_policy = ?config.stale_policy,
            "conversion service started"
        );

        AppHandle {
            intake: Intake::new(self.ctx),
            workers,
            shutdown_tx,
            loops,
        }
    }
}

/// Running application.
pub struct AppHandle {
    intake: Intake,
    workers: WorkerPool,
    shutdown_tx: watch::Sender<bool>,
    loops: Vec<JoinHandle<()>>,
}

impl AppHandle {
    pub fn intake(&self) -> Intake {
        self.intake.clone()
    }

    /// Stop taking new work and wait for workers and loops to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        self.workers.shutdown_and_join().await;
        for join in self.loops {
            if let Err(err) = join.await {
                tracing::error!(error = %err, "background loop ended abnormally");
            }
        }
        tracing::info!("conversion service stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::format::Format;
    use crate::domain::job::JobStatus;
    use crate::ports::collect_bytes;
    use crate::testing::{EchoConverter, upload};
    use std::time::Duration;

    #[test]
    fn builtin_converters_cover_default_formats() {
        let app = AppBuilder::new(ServiceConfig::default())
            .with_builtin_converters()
            .unwrap()
            .build();
        assert!(app.is_ok());
    }

    #[test]
    fn missing_converters_fail_fast() {
        let mut config = ServiceConfig::default();
        config.supported_formats.insert(Format::new("mp3"));
        config.supported_formats.insert(Format::new("docx"));

        let result = AppBuilder::new(config)
            .with_builtin_converters()
            .unwrap()
            .build();
        assert!(matches!(
            result,
            Err(BuildError::MissingConverters(missing)) if missing == vec!["docx".to_string(), "mp3".to_string()]
        ));
    }

    #[test]
    fn ffmpeg_adds_audio_and_video_targets() {
        let mut config = ServiceConfig::default();
        config.supported_formats.extend([Format::new("mp3"), Format::new("mp4")]);

        let result = AppBuilder::new(config)
            .with_builtin_converters()
            .and_then(|b| b.with_ffmpeg("ffmpeg"))
            .unwrap()
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn invalid_config_fails_fast() {
        let config = ServiceConfig {
            workers: 0,
            ..ServiceConfig::default()
        };
        let result = AppBuilder::new(config)
            .with_builtin_converters()
            .unwrap()
            .build();
        assert!(matches!(result, Err(BuildError::InvalidConfig(_))));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let result = AppBuilder::new(ServiceConfig::default())
            .register(Arc::new(EchoConverter::new(&[("txt", "pdf")])))
            .and_then(|b| b.with_builtin_converters());
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered { .. })));
    }

    #[tokio::test]
    async fn text_to_pdf_end_to_end() {
        let handle = AppBuilder::new(ServiceConfig::default())
            .with_builtin_converters()
            .unwrap()
            .build()
            .unwrap()
            .start();
        let intake = handle.intake();

        let id = intake
            .submit(upload("hello.txt", "pdf", b"Hello from the conversion service"))
            .await
            .unwrap();
        let first = intake.get_progress(&id).await.unwrap();
        assert!(matches!(first.status, JobStatus::Queued | JobStatus::Processing | JobStatus::Finished));

        let snapshot = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let snapshot = intake.get_progress(&id).await.unwrap();
                if snapshot.status.is_terminal() {
                    return snapshot;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(snapshot.status, JobStatus::Finished);
        assert_eq!(snapshot.progress, 100);

        let download = intake.get_output(&id).await.unwrap();
        assert_eq!(download.filename, "hello.pdf");
        assert_eq!(download.content_type, "application/pdf");
        let data = collect_bytes(download.body).await.unwrap();
        assert!(data.starts_with(b"%PDF-"));
        assert_eq!(data.len() as u64, download.size);

        handle.shutdown().await;
    }
}
