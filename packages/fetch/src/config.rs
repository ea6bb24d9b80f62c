//! Run configuration.
//!
//! A single [`FetchConfig`] is built at startup from the embedded
//! `config/default.toml` (optionally with path overrides from the
//! environment) and passed by reference to every stage.

use std::path::PathBuf;
use std::time::Duration;

use la_parcels_arcgis::{ArcGisEndpoints, RetryPolicy};
use la_parcels_models::BoundingBox;
use serde::Deserialize;

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Environment variable overriding [`FetchConfig::input_path`].
pub const INPUT_PATH_ENV: &str = "LA_PARCELS_INPUT";

/// Environment variable overriding [`FetchConfig::output_path`].
pub const OUTPUT_PATH_ENV: &str = "LA_PARCELS_OUTPUT";

/// Errors from building the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The TOML could not be parsed.
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("Invalid config: {message}")]
    Invalid {
        /// Which value is wrong and why.
        message: String,
    },
}

/// Everything a run needs to know, fixed for its whole duration.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Listings CSV to read coordinates from.
    pub input_path: PathBuf,
    /// Parcel cache file to load and save.
    pub output_path: PathBuf,
    /// Maximum coordinates fetched concurrently.
    pub workers: usize,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Completions between progress log lines.
    pub progress_interval: u64,
    /// Completions between cache checkpoints.
    pub checkpoint_interval: u64,
    /// Pending coordinates processed in test mode.
    pub test_limit: usize,
    /// `ArcGIS` endpoints.
    pub arcgis: ArcGisEndpoints,
    /// Listings outside this box are ignored.
    pub bounding_box: BoundingBox,
    /// Retry budget for each query.
    pub retry: RetryPolicy,
}

impl FetchConfig {
    /// Parses and validates a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the TOML is malformed or a value is out
    /// of range.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// The configuration compiled into the binary.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the embedded TOML is invalid.
    pub fn embedded() -> Result<Self, ConfigError> {
        Self::from_toml(DEFAULT_CONFIG)
    }

    /// The embedded configuration with `LA_PARCELS_INPUT` /
    /// `LA_PARCELS_OUTPUT` applied when set and non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the embedded TOML is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::embedded()?;
        if let Some(path) = env_path(INPUT_PATH_ENV) {
            config.input_path = path;
        }
        if let Some(path) = env_path(OUTPUT_PATH_ENV) {
            config.output_path = path;
        }
        Ok(config)
    }

    /// Per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| {
            Err(ConfigError::Invalid {
                message: message.to_string(),
            })
        };

        if self.workers == 0 {
            return invalid("workers must be at least 1");
        }
        if self.progress_interval == 0 || self.checkpoint_interval == 0 {
            return invalid("progress_interval and checkpoint_interval must be at least 1");
        }
        let offset = self.arcgis.envelope_offset;
        if offset.is_nan() || offset <= 0.0 {
            return invalid("arcgis.envelope_offset must be positive");
        }
        Ok(())
    }
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
