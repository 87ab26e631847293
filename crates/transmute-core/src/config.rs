//! Service configuration.
//!
//! Plain data with defaults; the server crate fills it from the environment.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::domain::format::Format;
use crate::domain::job::StalePolicy;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Upload size limit in bytes.
    pub max_upload_bytes: u64,

    /// Converted output size limit in bytes.
    pub max_output_bytes: u64,

    /// Output formats clients may request.
    pub supported_formats: BTreeSet<Format>,

    /// Number of conversion workers.
    pub workers: usize,

    /// A processing job without progress for this long is stale.
    pub stale_after: Duration,

    pub stale_policy: StalePolicy,

    /// How long terminal jobs and their blobs are kept.
    pub retention: Duration,

    pub reaper_interval: Duration,
    pub gc_interval: Duration,

    /// Longest a worker blocks on the queue before re-checking shutdown.
    pub pop_timeout: Duration,

    /// How often a running worker re-validates its lease.
    pub lease_check_interval: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 100 * 1024 * 1024,
            max_output_bytes: 500 * 1024 * 1024,
            supported_formats: ["pdf", "png", "jpg"].into_iter().map(Format::new).collect(),
            workers: 4,
            stale_after: Duration::from_secs(300),
            stale_policy: StalePolicy::Fail,
            retention: Duration::from_secs(3600),
            reaper_interval: Duration::from_secs(15),
            gc_interval: Duration::from_secs(60),
            pop_timeout: Duration::from_secs(1),
            lease_check_interval: Duration::from_secs(5),
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError("workers must be at least 1".into()));
        }
        if self.supported_formats.is_empty() {
            return Err(ConfigError("no supported output formats".into()));
        }
        if self.max_upload_bytes == 0 || self.max_output_bytes == 0 {
            return Err(ConfigError("size limits must be positive".into()));
        }
        let timers = [
            ("stale_after", self.stale_after),
            ("retention", self.retention),
            ("reaper_interval", self.reaper_interval),
            ("gc_interval", self.gc_interval),
            ("pop_timeout", self.pop_timeout),
            ("lease_check_interval", self.lease_check_interval),
        ];
        if let Some((name, _)) = timers.iter().find(|(_, value)| value.is_zero()) {
            return Err(ConfigError(format!("{name} must be positive")));
        }
        if let StalePolicy::Requeue { max_attempts: 0 } = self.stale_policy {
            return Err(ConfigError("max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}
