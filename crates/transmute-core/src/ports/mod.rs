//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。ジョブの正本（JobStore）、
//! 配送キュー（DeliveryQueue）、ファイル本体（BlobStore）、時刻と ID 生成を
//! trait として切り出し、実装は `impls` に置きます。
//!
//! # 設計原則
//! - JobStore が source of truth（正本）
//! - DeliveryQueue は job_id のみを流す
//! - ファイル本体は BlobStore にだけ置き、レコードは BlobId で参照する

pub mod blob_store;
pub mod clock;
pub mod delivery_queue;
pub mod id_generator;
pub mod job_store;

pub use self::blob_store::{BlobStore, ByteStream, StorageError, bytes_stream, collect_bytes};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::delivery_queue::{DeliveryQueue, QueueError};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::job_store::{DownloadPin, JobStore, ReapAction, Reaped};
