//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryJobStore**: プロセス内のジョブ正本
//! - **InMemoryDeliveryQueue**: プロセス内の配送キュー
//! - **InMemoryBlobStore**: テスト用の BlobStore
//! - **FsBlobStore**: ローカルディスクの BlobStore

pub mod fs_blob;
pub mod inmem_blob;
pub mod inmem_delivery;
pub mod inmem_job_store;

pub use self::fs_blob::FsBlobStore;
pub use self::inmem_blob::InMemoryBlobStore;
pub use self::inmem_delivery::InMemoryDeliveryQueue;
pub use self::inmem_job_store::InMemoryJobStore;
