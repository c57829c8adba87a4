//! Application configuration.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::Validate;

use crate::{AppError, AppResult};

/// Application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Document store configuration.
    #[serde(default)]
    pub store: StoreConfig,
    /// Default usage limits for gated writes.
    #[serde(default)]
    pub rate_limits: RateLimitDefaults,
    /// Initial vote storage feature flags.
    #[serde(default)]
    pub vote_storage: VoteStorageConfig,
    /// Vote migration pacing.
    #[serde(default)]
    pub migration: MigrationConfig,
    /// Retry policy for transient store failures.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Logging output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Document store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// JSON snapshot the operator tooling loads and writes back.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
        }
    }
}

/// Default limit per usage category.
///
/// These seed the live limits document; operators tune the live values.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Validate)]
pub struct RateLimitDefaults {
    /// Teams a user may create.
    #[validate(range(min = 1))]
    #[serde(default = "default_team_creation_limit")]
    pub team_creation: i64,
    /// Messages per team.
    #[validate(range(min = 1))]
    #[serde(default = "default_messages_limit")]
    pub messages: i64,
    /// Join requests a user may send.
    #[validate(range(min = 1))]
    #[serde(default = "default_join_requests_limit")]
    pub join_requests: i64,
    /// Surveys per team.
    #[validate(range(min = 1))]
    #[serde(default = "default_surveys_limit")]
    pub surveys: i64,
    /// Fines per team.
    #[validate(range(min = 1))]
    #[serde(default = "default_fines_limit")]
    pub fines: i64,
}

impl Default for RateLimitDefaults {
    fn default() -> Self {
        Self {
            team_creation: default_team_creation_limit(),
            messages: default_messages_limit(),
            join_requests: default_join_requests_limit(),
            surveys: default_surveys_limit(),
            fines: default_fines_limit(),
        }
    }
}

/// Initial values for the vote storage feature flags.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct VoteStorageConfig {
    /// Read and write votes as sub-documents.
    #[serde(default)]
    pub use_subcollection: bool,
    /// Write both representations in one batch.
    #[serde(default)]
    pub dual_write: bool,
}

/// Vote migration pacing.
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationConfig {
    /// Operations per batch. Clamped to [`MigrationConfig::MAX_BATCH_SIZE`].
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause after every committed batch, in milliseconds.
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
    /// Every this many batches the long pause applies instead.
    #[serde(default = "default_long_pause_every")]
    pub long_pause_every: usize,
    /// Long pause, in milliseconds.
    #[serde(default = "default_long_pause_ms")]
    pub long_pause_ms: u64,
}

impl MigrationConfig {
    /// One below the store's hard limit of 500 operations per batch.
    pub const MAX_BATCH_SIZE: usize = 499;

    /// Batch size bounded to `1..=MAX_BATCH_SIZE`.
    #[must_use]
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.clamp(1, Self::MAX_BATCH_SIZE)
    }

    /// Pause to apply after the given batch number (1-based).
    #[must_use]
    pub const fn pause_after(&self, batch_number: usize) -> Duration {
        if self.long_pause_every > 0 && batch_number % self.long_pause_every == 0 {
            Duration::from_millis(self.long_pause_ms)
        } else {
            Duration::from_millis(self.batch_pause_ms)
        }
    }

    /// Pacing without any pauses.
    #[must_use]
    pub const fn unpaced() -> Self {
        Self {
            batch_size: Self::MAX_BATCH_SIZE,
            batch_pause_ms: 0,
            long_pause_every: 0,
            long_pause_ms: 0,
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_pause_ms: default_batch_pause_ms(),
            long_pause_every: default_long_pause_every(),
            long_pause_ms: default_long_pause_ms(),
        }
    }
}

/// Retry configuration with exponential backoff.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Initial delay between retries, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Maximum delay between retries, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryConfig {
    /// Calculate delay for the given attempt number (0-indexed).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let max_delay = Duration::from_millis(self.max_delay_ms);
        if attempt >= self.max_retries {
            return max_delay;
        }

        let delay_ms = self.initial_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        // Overflowing or non-finite delays saturate at the cap.
        Duration::try_from_secs_f64(delay_ms / 1000.0)
            .unwrap_or(max_delay)
            .min(max_delay)
    }

    /// Check if we should retry after the given number of attempts.
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Logging output.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("data/store.json")
}

const fn default_team_creation_limit() -> i64 {
    5
}

const fn default_messages_limit() -> i64 {
    50
}

const fn default_join_requests_limit() -> i64 {
    5
}

const fn default_surveys_limit() -> i64 {
    10
}

const fn default_fines_limit() -> i64 {
    500
}

const fn default_batch_size() -> usize {
    MigrationConfig::MAX_BATCH_SIZE
}

const fn default_batch_pause_ms() -> u64 {
    100
}

const fn default_long_pause_every() -> usize {
    10
}

const fn default_long_pause_ms() -> u64 {
    1000
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_delay_ms() -> u64 {
    200
}

const fn default_max_delay_ms() -> u64 {
    5000
}

const fn default_multiplier() -> f64 {
    2.0
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (based on `CLUBDESK_ENV`)
    /// 3. Environment variables with `CLUBDESK__` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let env = std::env::var("CLUBDESK_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("CLUBDESK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("CLUBDESK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Reject configurations no component can run with.
    pub fn validate(&self) -> AppResult<()> {
        self.rate_limits.validate()?;
        if self.retry.multiplier < 1.0 {
            return Err(AppError::Config(
                "retry.multiplier must be at least 1.0".to_string(),
            ));
        }
        Ok(())
    }
}
