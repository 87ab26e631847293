//! Domain model (IDs, formats, job records, errors).

pub mod blob;
pub mod errors;
pub mod format;
pub mod ids;
pub mod job;

pub use blob::BlobInfo;
pub use errors::{QueueError, StorageError, TransmuteError};
pub use format::{ConversionPair, Format};
pub use ids::{BlobId, JobId, ParseIdError};
pub use job::{JobRecord, JobSnapshot, JobStatus, Lease, StalePolicy, StatusCounts};
