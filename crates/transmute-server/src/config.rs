use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use transmute_core::{Format, ServiceConfig, StalePolicy};

/// Configuration error raised while reading the environment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `300`).
    pub request_timeout_secs: u64,
    /// Root directory of the filesystem blob store.
    pub storage_dir: PathBuf,
    /// ffmpeg binary. The audio/video converter is only registered when set.
    pub ffmpeg_path: Option<PathBuf>,
    pub service: ServiceConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `8000`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:3000`    |
    /// | `REQUEST_TIMEOUT_SECS` | `300`                      |
    /// | `STORAGE_DIR`          | `./data/blobs`             |
    /// | `MAX_UPLOAD_BYTES`     | `104857600`                |
    /// | `MAX_OUTPUT_BYTES`     | `524288000`                |
    /// | `SUPPORTED_FORMATS`    | `pdf,png,jpg` (`+mp3,mp4` with ffmpeg) |
    /// | `WORKER_COUNT`         | `4`                        |
    /// | `STALE_AFTER_SECS`     | `300`                      |
    /// | `STALE_POLICY`         | `fail` (or `requeue`)      |
    /// | `MAX_ATTEMPTS`         | `3`                        |
    /// | `RETENTION_SECS`       | `3600`                     |
    /// | `REAPER_INTERVAL_SECS` | `15`                       |
    /// | `GC_INTERVAL_SECS`     | `60`                       |
    /// | `FFMPEG_PATH`          | unset                      |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`ServerConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup };
        let defaults = ServiceConfig::default();

        let ffmpeg_path = env.get("FFMPEG_PATH").map(PathBuf::from);
        let supported_formats = match env.get("SUPPORTED_FORMATS") {
            Some(list) => split_list(&list).map(Format::new).collect(),
            None => {
                let mut formats = defaults.supported_formats.clone();
                if ffmpeg_path.is_some() {
                    formats.extend([Format::new("mp3"), Format::new("mp4")]);
                }
                formats
            }
        };

        let stale_policy = match env.get("STALE_POLICY").as_deref().map(str::trim) {
            None | Some("fail") => StalePolicy::Fail,
            Some("requeue") => StalePolicy::Requeue {
                max_attempts: env.parse("MAX_ATTEMPTS", 3)?,
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "STALE_POLICY",
                    value: other.to_string(),
                    reason: "expected 'fail' or 'requeue'".into(),
                });
            }
        };

        let service = ServiceConfig {
            max_upload_bytes: env.parse("MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
            max_output_bytes: env.parse("MAX_OUTPUT_BYTES", defaults.max_output_bytes)?,
            supported_formats,
            workers: env.parse("WORKER_COUNT", defaults.workers)?,
            stale_after: env.secs("STALE_AFTER_SECS", defaults.stale_after)?,
            stale_policy,
            retention: env.secs("RETENTION_SECS", defaults.retention)?,
            reaper_interval: env.secs("REAPER_INTERVAL_SECS", defaults.reaper_interval)?,
            gc_interval: env.secs("GC_INTERVAL_SECS", defaults.gc_interval)?,
            ..defaults
        };

        Ok(Self {
            host: env.get("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: env.parse("PORT", 8000)?,
            cors_origins: split_list(
                &env.get("CORS_ORIGINS")
                    .unwrap_or_else(|| "http://localhost:3000".into()),
            )
            .map(str::to_string)
            .collect(),
            request_timeout_secs: env.parse("REQUEST_TIMEOUT_SECS", 300)?,
            storage_dir: env
                .get("STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/blobs")),
            ffmpeg_path,
            service,
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    /// Empty values count as unset.
    fn get(&self, var: &str) -> Option<String> {
        (self.lookup)(var).filter(|value| !value.trim().is_empty())
    }

    fn parse<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(var) {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
                var,
                reason: err.to_string(),
                value,
            }),
        }
    }

    fn secs(&self, var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse(var, default.as_secs()).map(Duration::from_secs)
    }
}

fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|item| !item.is_empty())
}
