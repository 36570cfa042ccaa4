use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Default ceiling for a single upload (50 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;
/// Default ceiling for extracted text, in characters.
pub const DEFAULT_MAX_EXTRACTED_CHARS: usize = 50_000;
/// Default target length of the stored text summary, in characters.
pub const DEFAULT_SUMMARY_LENGTH: usize = 500;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the ingestion pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Root directory that owns every stored blob.
    pub upload_dir: PathBuf,
    /// Directory backing the JSON record store used by the CLI.
    pub record_dir: PathBuf,
    /// Largest accepted upload in bytes.
    pub max_upload_bytes: u64,
    /// Cap applied to extracted text, in characters.
    pub max_extracted_chars: usize,
    /// Target length for the summary merged into record metadata.
    pub summary_length: usize,
    /// Number of files processed concurrently by the background worker.
    pub processing_concurrency: usize,
    /// Optional wall-clock limit on a single extraction.
    pub extraction_timeout: Option<Duration>,
    /// Blobs younger than this are never removed by reconciliation.
    pub reconcile_grace_period: Duration,
    /// Records left in `processing` longer than this are considered interrupted.
    pub stuck_processing_after: Duration,
    /// Optional `ffprobe` binary used for audio metadata.
    pub ffprobe_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            record_dir: PathBuf::from("records"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_extracted_chars: DEFAULT_MAX_EXTRACTED_CHARS,
            summary_length: DEFAULT_SUMMARY_LENGTH,
            processing_concurrency: 4,
            extraction_timeout: None,
            reconcile_grace_period: Duration::from_secs(60),
            stuck_processing_after: Duration::from_secs(15 * 60),
            ffprobe_path: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults for unset keys.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let processing_concurrency =
            parse_optional("PROCESSING_CONCURRENCY")?.unwrap_or(defaults.processing_concurrency);
        if processing_concurrency == 0 {
            return Err(ConfigError::InvalidValue("PROCESSING_CONCURRENCY".into()));
        }

        Ok(Self {
            upload_dir: load_env_optional("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            record_dir: load_env_optional("RECORD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.record_dir),
            max_upload_bytes: parse_optional("MAX_UPLOAD_BYTES")?
                .unwrap_or(defaults.max_upload_bytes),
            max_extracted_chars: parse_optional("MAX_EXTRACTED_CHARS")?
                .unwrap_or(defaults.max_extracted_chars),
            summary_length: parse_optional("SUMMARY_LENGTH")?.unwrap_or(defaults.summary_length),
            processing_concurrency,
            extraction_timeout: parse_optional("EXTRACTION_TIMEOUT_SECS")?
                .map(Duration::from_secs),
            reconcile_grace_period: parse_optional("RECONCILE_GRACE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.reconcile_grace_period),
            stuck_processing_after: parse_optional("STUCK_PROCESSING_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.stuck_processing_after),
            ffprobe_path: load_env_optional("FFPROBE_PATH"),
        })
    }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_optional<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
///
/// Reads `.env` first when present. Calling this twice keeps the first configuration.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        upload_dir = %config.upload_dir.display(),
        record_dir = %config.record_dir.display(),
        max_upload_bytes = config.max_upload_bytes,
        concurrency = config.processing_concurrency,
        "Loaded configuration"
    );
    Ok(CONFIG.get_or_init(|| config))
}
