//! Shared handles passed to every app component.

use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::convert::ConverterRegistry;
use crate::ports::{BlobStore, Clock, DeliveryQueue, IdGenerator, JobStore};

/// Everything the intake, workers and background loops share.
///
/// Cloning is cheap: every field is an `Arc`.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServiceConfig>,
    pub jobs: Arc<dyn JobStore>,
    pub queue: Arc<dyn DeliveryQueue>,
    pub blobs: Arc<dyn BlobStore>,
    pub converters: Arc<ConverterRegistry>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
}
