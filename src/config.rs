//! Recognized configuration options (§6), with the crate's documented
//! defaults and environment-variable overrides.
//!
//! Loading follows the same "try the environment, fall back to the
//! documented default, never hard-fail" idiom used elsewhere in this crate's
//! default-configuration helpers.

use std::env;
use std::time::Duration;

pub const DEFAULT_PART_SIZE: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MAX_CONCURRENT_UPLOADS: usize = 5;
pub const DEFAULT_API_BASE_URL: &str = "/api";
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 180;
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024 * 1024;
pub const DEFAULT_ALLOWED_FILE_TYPES: &[&str] =
    &["video/mp4", "video/quicktime", "video/x-msvideo"];

pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;
pub const DEFAULT_RETRY_JITTER_FACTOR: f64 = 0.2;
pub const DEFAULT_RETRY_STATUS_CODES: &[u16] = &[408, 429, 500, 502, 503, 504];

pub const DEFAULT_ACCELERATION_ENABLED: bool = true;
pub const DEFAULT_ACCELERATION_MIN_SIZE: u64 = 512 * 1024 * 1024;

/// Exponential-moving-average speed tracker tuning (§9 design note, promoted
/// from optional to implemented in the expanded spec).
pub const SPEED_EMA_WEIGHT: f64 = 0.3;
pub const SPEED_SAMPLE_WINDOW: Duration = Duration::from_secs(5);

pub const PERSISTENCE_DB_NAME: &str = "UploadServiceWorkerDB";
pub const PERSISTENCE_DB_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub attempts: u32,
    pub delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
    pub status_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_RETRY_MAX_DELAY_MS),
            jitter_factor: DEFAULT_RETRY_JITTER_FACTOR,
            status_codes: DEFAULT_RETRY_STATUS_CODES.to_vec(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccelerationConfig {
    pub enabled: bool,
    pub min_size: u64,
}

impl Default for AccelerationConfig {
    fn default() -> Self {
        Self {
            enabled: DEFAULT_ACCELERATION_ENABLED,
            min_size: DEFAULT_ACCELERATION_MIN_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub part_size: u64,
    pub max_concurrent_uploads: usize,
    pub api_base_url: String,
    pub api_timeout: Duration,
    pub max_file_size: u64,
    pub allowed_file_types: Vec<String>,
    pub retry: RetryConfig,
    pub acceleration: AccelerationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            max_concurrent_uploads: DEFAULT_MAX_CONCURRENT_UPLOADS,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_timeout: Duration::from_secs(DEFAULT_API_TIMEOUT_SECS),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            allowed_file_types: DEFAULT_ALLOWED_FILE_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            retry: RetryConfig::default(),
            acceleration: AccelerationConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Loads defaults, then overlays whichever `UPLOAD_ENGINE_*` environment
    /// variables are set. Unset or unparsable variables are ignored, never
    /// a hard failure.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(value) = env_u64("UPLOAD_ENGINE_PART_SIZE") {
            config.part_size = value;
        }
        if let Some(value) = env_usize("UPLOAD_ENGINE_MAX_CONCURRENT_UPLOADS") {
            config.max_concurrent_uploads = value;
        }
        if let Ok(value) = env::var("UPLOAD_ENGINE_API_BASE_URL") {
            if !value.is_empty() {
                config.api_base_url = value;
            }
        }
        if let Some(secs) = env_u64("UPLOAD_ENGINE_API_TIMEOUT_SECS") {
            config.api_timeout = Duration::from_secs(secs);
        }

        config
    }

    pub fn total_parts(&self, file_size: u64) -> u32 {
        if self.part_size == 0 {
            return 0;
        }
        ((file_size + self.part_size - 1) / self.part_size) as u32
    }
}

fn env_u64(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_usize(name: &str) -> Option<usize> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}
