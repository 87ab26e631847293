//! transmute-core
//!
//! Asynchronous, job-based file conversion.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, format, job, errors）
//! - **ports**: 抽象化レイヤー（JobStore, DeliveryQueue, BlobStore, Clock, IdGenerator）
//! - **impls**: ports の実装（インメモリ、ローカルディスク）
//! - **convert**: Converter trait と組み込み converter
//! - **app**: アプリケーションロジック（builder, intake, worker_loop, reaper_loop, gc_loop）
//! - **config**: サービス設定

pub mod app;
pub mod config;
pub mod convert;
pub mod domain;
pub mod impls;
pub mod ports;

#[cfg(test)]
pub(crate) mod testing;

pub use app::{App, AppBuilder, AppHandle, BuildError, Download, Intake, StagedUpload, Upload};
pub use config::ServiceConfig;
pub use domain::{
    ConversionPair, Format, JobId, JobSnapshot, JobStatus, StalePolicy, StatusCounts,
    TransmuteError,
};
