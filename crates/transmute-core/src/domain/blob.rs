use serde::{Deserialize, Serialize};

use super::ids::BlobId;

/// Non-owning reference to a stored blob. The blob store owns the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobInfo {
    pub id: BlobId,
    pub size: u64,
}
