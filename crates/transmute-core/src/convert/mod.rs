//! Converters - フォーマット変換の実装
//!
//! `Converter` は (source, target) のペアを一つ以上担当し、入力ストリームを
//! 出力ストリームに変換します。ワーカーは `ConverterRegistry` からペアで
//! converter を引き、結果を BlobStore に書き込みます。
//!
//! # 組み込み converter
//! - **TextToPdf**: txt / md / csv / log → pdf（依存なしの PDF 生成）
//! - **ImageConverter**: png / jpg / webp / gif / bmp → png / jpg（`image` crate）
//! - **FfmpegConverter**: 音声・動画 → mp3 / mp4（外部 ffmpeg）

use std::io;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::format::ConversionPair;
use crate::ports::ByteStream;

pub mod ffmpeg;
pub mod progress;
pub mod raster;
pub mod registry;
pub mod text_pdf;

pub use self::ffmpeg::FfmpegConverter;
pub use self::raster::ImageConverter;
pub use self::progress::ProgressReporter;
pub use self::registry::{ConverterRegistry, RegistryError};
pub use self::text_pdf::TextToPdf;

/// Input handed to a converter.
pub struct ConversionInput {
    pub pair: ConversionPair,
    /// Size of the source blob in bytes.
    pub size: u64,
    pub body: ByteStream<'static>,
}

#[derive(Debug, Error)]
pub enum ConvertError {
    /// The input is not a valid file of its declared format.
    #[error("corrupt input: {0}")]
    Corrupt(String),

    #[error("no conversion for {0}")]
    Unsupported(ConversionPair),

    /// An external tool exited unsuccessfully.
    #[error("{program} failed ({status}): {stderr}")]
    Tool {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[async_trait]
pub trait Converter: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Every pair this converter handles.
    fn pairs(&self) -> Vec<ConversionPair>;

    /// Convert `input`. Long conversions should call `progress.report`
    /// when they can. Liveness does not depend on it: the worker running
    /// the conversion keeps the job's heartbeat fresh while it is alive.
    async fn convert(
        &self,
        input: ConversionInput,
        progress: ProgressReporter,
    ) -> Result<ByteStream<'static>, ConvertError>;
}
