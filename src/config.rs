//! Configuration for the conversion pipeline.
//!
//! All pipeline behaviour is controlled through [`ConversionConfig`], built via
//! [`ConversionConfigBuilder`]. Setters clamp out-of-range values; `build()`
//! rejects combinations that can never work.

use crate::error::MarkitError;
use crate::parser::ParseOptions;
use std::path::PathBuf;
use std::time::Duration;

/// Default copy chunk: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;
const MIN_CHUNK_SIZE: usize = 4 * 1024;
const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;

/// Configuration for the conversion pipeline and its job coordination.
///
/// # Example
/// ```rust
/// use markit::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .chunk_size(256 * 1024)
///     .join_timeout_ms(1_000)
///     .build()
///     .unwrap();
/// assert_eq!(config.chunk_size, 256 * 1024);
/// ```
#[derive(Debug, Clone)]
pub struct ConversionConfig {
    /// Bytes copied per step when staging the input. Default: 1 MiB.
    ///
    /// The token is checked between chunks, so this bounds how much work a
    /// cancelled staging copy can still do.
    pub chunk_size: usize,

    /// Directory for the private input copy. Default: system temp dir.
    pub staging_dir: Option<PathBuf>,

    /// Directory for output artifacts. Default: system temp dir.
    pub output_dir: Option<PathBuf>,

    /// How often the monitor and the waiting caller poll the token. Default: 100.
    pub poll_interval_ms: u64,

    /// How long the caller waits for the worker after requesting
    /// cancellation before giving up on it. Default: 500.
    pub join_timeout_ms: u64,

    /// Extra options forwarded to every backend call.
    pub extra_options: ParseOptions,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            staging_dir: None,
            output_dir: None,
            poll_interval_ms: 100,
            join_timeout_ms: 500,
            extra_options: ParseOptions::new(),
        }
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.config.chunk_size = bytes.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
        self
    }

    pub fn staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.staging_dir = Some(dir.into());
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = Some(dir.into());
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms.max(1);
        self
    }

    pub fn join_timeout_ms(mut self, ms: u64) -> Self {
        self.config.join_timeout_ms = ms;
        self
    }

    /// Set one extra backend option.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.config.extra_options.insert(key.into(), value.into());
        self
    }

    /// Replace all extra backend options.
    pub fn extra_options(mut self, options: ParseOptions) -> Self {
        self.config.extra_options = options;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, MarkitError> {
        let c = &self.config;
        for (what, dir) in [("staging", &c.staging_dir), ("output", &c.output_dir)] {
            if let Some(dir) = dir {
                if !dir.is_dir() {
                    return Err(MarkitError::InvalidConfig(format!(
                        "{what} directory '{}' does not exist",
                        dir.display()
                    )));
                }
            }
        }
        if c.chunk_size == 0 {
            return Err(MarkitError::InvalidConfig(
                "Chunk size must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}
