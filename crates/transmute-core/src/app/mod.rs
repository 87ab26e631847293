//! App - アプリケーション層
//!
//! ports を組み合わせて変換サービスを実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: 構築とワイヤリング（起動時検証）
//! - **Intake**: submit / get_progress / get_output / cancel
//! - **WorkerPool / WorkerLoop**: pop→claim→convert→store→finish
//! - **ReaperLoop**: ハートビートが途切れたジョブの回収
//! - **GcLoop**: 保持期間を過ぎたジョブと blob の削除

pub mod builder;
pub mod context;
pub mod gc_loop;
pub mod intake;
pub mod reaper_loop;
pub mod worker_loop;

pub use self::builder::{App, AppBuilder, AppHandle, BuildError};
pub use self::context::AppContext;
pub use self::gc_loop::GcLoop;
pub use self::intake::{Download, Intake, StagedUpload, Upload};
pub use self::reaper_loop::ReaperLoop;
pub use self::worker_loop::{WorkerLoop, WorkerPool};
