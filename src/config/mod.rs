//! Configuration loading for batchwatch.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `BATCHWATCH_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::integrations::Credentials;

const ENV_PREFIX: &str = "BATCHWATCH_";
const REDACTED: &str = "[REDACTED]";

/// Application configuration derived from `BATCHWATCH_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,
    #[serde(default = "default_openai_api_base")]
    pub openai_api_base: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keboola_api_token: Option<String>,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub retry: RetryPolicyConfig,
    #[serde(default)]
    pub poll_interval: PollIntervalConfig,
}

/// Polling loop parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct OrchestratorConfig {
    /// Upper bound on the sleep between two ticks (default: 5)
    ///
    /// Environment variable: `BATCHWATCH_ORCHESTRATOR_TICK_INTERVAL_SECONDS`
    #[serde(default = "default_orchestrator_tick_interval_seconds")]
    pub tick_interval_seconds: u64,

    /// Lower bound on the sleep between two ticks (default: 250)
    ///
    /// Environment variable: `BATCHWATCH_ORCHESTRATOR_MIN_SLEEP_MS`
    #[serde(default = "default_orchestrator_min_sleep_ms")]
    pub min_sleep_ms: u64,

    /// Global cap on in-flight external calls (default: 10)
    ///
    /// Environment variable: `BATCHWATCH_ORCHESTRATOR_MAX_CONCURRENCY`
    #[serde(default = "default_orchestrator_max_concurrency")]
    pub max_concurrency: usize,

    /// Maximum due jobs fetched per tick (default: 50)
    ///
    /// Environment variable: `BATCHWATCH_ORCHESTRATOR_DUE_BATCH_LIMIT`
    #[serde(default = "default_orchestrator_due_batch_limit")]
    pub due_batch_limit: u64,

    /// How long shutdown waits for in-flight jobs before aborting them (default: 30)
    ///
    /// Environment variable: `BATCHWATCH_ORCHESTRATOR_SHUTDOWN_GRACE_SECONDS`
    #[serde(default = "default_orchestrator_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
}

/// Backoff parameters for transient probe failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RetryPolicyConfig {
    /// Delay before the first retry in milliseconds (default: 1000)
    ///
    /// Subsequent retries double the delay: base_delay_ms * 2^(attempt-1).
    ///
    /// Environment variable: `BATCHWATCH_RETRY_BASE_DELAY_MS`
    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Cap on any single retry delay in milliseconds (default: 60000)
    ///
    /// Environment variable: `BATCHWATCH_RETRY_MAX_DELAY_MS`
    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Total attempts per probe call, including the first (default: 3)
    ///
    /// Environment variable: `BATCHWATCH_RETRY_MAX_ATTEMPTS`
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
}

/// Bounds applied to a watch job's poll interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PollIntervalConfig {
    #[serde(default = "default_poll_interval_min_seconds")]
    pub min_seconds: u32,
    #[serde(default = "default_poll_interval_max_seconds")]
    pub max_seconds: u32,
    #[serde(default = "default_poll_interval_default_seconds")]
    pub default_seconds: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            openai_api_key: None,
            openai_api_base: default_openai_api_base(),
            keboola_api_token: None,
            http_timeout_seconds: default_http_timeout_seconds(),
            orchestrator: OrchestratorConfig::default(),
            retry: RetryPolicyConfig::default(),
            poll_interval: PollIntervalConfig::default(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: default_orchestrator_tick_interval_seconds(),
            min_sleep_ms: default_orchestrator_min_sleep_ms(),
            max_concurrency: default_orchestrator_max_concurrency(),
            due_batch_limit: default_orchestrator_due_batch_limit(),
            shutdown_grace_seconds: default_orchestrator_shutdown_grace_seconds(),
        }
    }
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_retry_base_delay_ms(),
            max_delay_ms: default_retry_max_delay_ms(),
            max_attempts: default_retry_max_attempts(),
        }
    }
}

impl Default for PollIntervalConfig {
    fn default() -> Self {
        Self {
            min_seconds: default_poll_interval_min_seconds(),
            max_seconds: default_poll_interval_max_seconds(),
            default_seconds: default_poll_interval_default_seconds(),
        }
    }
}

impl OrchestratorConfig {
    /// Validate polling loop bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_seconds == 0 || self.tick_interval_seconds > 300 {
            return Err(ConfigError::InvalidTickInterval {
                value: self.tick_interval_seconds,
            });
        }

        if self.min_sleep_ms == 0 || self.min_sleep_ms > self.tick_interval_seconds * 1000 {
            return Err(ConfigError::InvalidMinSleep {
                value: self.min_sleep_ms,
                tick_ms: self.tick_interval_seconds * 1000,
            });
        }

        if self.max_concurrency == 0 || self.max_concurrency > 100 {
            return Err(ConfigError::InvalidMaxConcurrency {
                value: self.max_concurrency,
            });
        }

        if self.due_batch_limit == 0 {
            return Err(ConfigError::InvalidDueBatchLimit {
                value: self.due_batch_limit,
            });
        }

        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_seconds)
    }

    pub fn min_sleep(&self) -> Duration {
        Duration::from_millis(self.min_sleep_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

impl RetryPolicyConfig {
    /// Validate retry backoff bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::InvalidRetryBounds {
                base: self.base_delay_ms,
                max: self.max_delay_ms,
            });
        }

        if self.max_attempts == 0 || self.max_attempts > 10 {
            return Err(ConfigError::InvalidRetryAttempts {
                value: self.max_attempts,
            });
        }

        Ok(())
    }
}

impl PollIntervalConfig {
    /// Validate that the default interval sits within the configured bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_seconds == 0 || self.min_seconds > self.max_seconds {
            return Err(ConfigError::InvalidPollIntervalBounds {
                min: self.min_seconds,
                max: self.max_seconds,
            });
        }

        if !self.contains(self.default_seconds) {
            return Err(ConfigError::InvalidPollIntervalDefault {
                value: self.default_seconds,
                min: self.min_seconds,
                max: self.max_seconds,
            });
        }

        Ok(())
    }

    pub fn contains(&self, seconds: u32) -> bool {
        (self.min_seconds..=self.max_seconds).contains(&seconds)
    }
}

impl AppConfig {
    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.openai_api_key.is_some() {
            config.openai_api_key = Some(REDACTED.to_string());
        }
        if config.keboola_api_token.is_some() {
            config.keboola_api_token = Some(REDACTED.to_string());
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        if self.http_timeout_seconds == 0 {
            return Err(ConfigError::InvalidHttpTimeout {
                value: self.http_timeout_seconds,
            });
        }

        self.orchestrator.validate()?;
        self.retry.validate()?;
        self.poll_interval.validate()?;

        Ok(())
    }

    /// Credentials for the batch status provider; required to run the orchestrator.
    pub fn openai_credentials(&self) -> Result<Credentials, ConfigError> {
        self.openai_api_key
            .as_deref()
            .map(Credentials::new)
            .ok_or(ConfigError::MissingOpenAiApiKey)
    }

    /// Credentials for the downstream trigger; required to run the orchestrator.
    pub fn keboola_credentials(&self) -> Result<Credentials, ConfigError> {
        self.keboola_api_token
            .as_deref()
            .map(Credentials::new)
            .ok_or(ConfigError::MissingKeboolaApiToken)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://batchwatch.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_openai_api_base() -> String {
    crate::integrations::openai::DEFAULT_API_BASE.to_string()
}

fn default_http_timeout_seconds() -> u64 {
    30
}

fn default_orchestrator_tick_interval_seconds() -> u64 {
    5
}

fn default_orchestrator_min_sleep_ms() -> u64 {
    250
}

fn default_orchestrator_max_concurrency() -> usize {
    10
}

fn default_orchestrator_due_batch_limit() -> u64 {
    50
}

fn default_orchestrator_shutdown_grace_seconds() -> u64 {
    30
}

fn default_retry_base_delay_ms() -> u64 {
    1000 // 1 second
}

fn default_retry_max_delay_ms() -> u64 {
    60_000 // 1 minute
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_poll_interval_min_seconds() -> u32 {
    30
}

fn default_poll_interval_max_seconds() -> u32 {
    3600 // 1 hour
}

fn default_poll_interval_default_seconds() -> u32 {
    120
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid value '{value}' for {key}")]
    InvalidNumber { key: String, value: String },
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("http timeout must be positive, got {value}")]
    InvalidHttpTimeout { value: u64 },
    #[error("OpenAI API key is missing; set BATCHWATCH_OPENAI_API_KEY")]
    MissingOpenAiApiKey,
    #[error("Keboola API token is missing; set BATCHWATCH_KEBOOLA_API_TOKEN")]
    MissingKeboolaApiToken,
    #[error("orchestrator tick interval must be between 1 and 300 seconds, got {value}")]
    InvalidTickInterval { value: u64 },
    #[error("orchestrator min sleep must be between 1 and {tick_ms} ms, got {value}")]
    InvalidMinSleep { value: u64, tick_ms: u64 },
    #[error("orchestrator max concurrency must be between 1 and 100, got {value}")]
    InvalidMaxConcurrency { value: usize },
    #[error("orchestrator due batch limit must be positive, got {value}")]
    InvalidDueBatchLimit { value: u64 },
    #[error("retry base delay ({base}ms) cannot be greater than max delay ({max}ms)")]
    InvalidRetryBounds { base: u64, max: u64 },
    #[error("retry max attempts must be between 1 and 10, got {value}")]
    InvalidRetryAttempts { value: u32 },
    #[error("poll interval bounds are invalid (min: {min}, max: {max})")]
    InvalidPollIntervalBounds { min: u32, max: u32 },
    #[error("default poll interval {value} is outside [{min}, {max}]")]
    InvalidPollIntervalDefault { value: u32, min: u32, max: u32 },
}

/// Loads configuration using layered `.env` files and `BATCHWATCH_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads and validates the layered configuration.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = layered
            .remove("PROFILE")
            .filter(|v| !v.is_empty())
            .unwrap_or(profile_hint);
        let log_level = take_string(&mut layered, "LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format =
            take_string(&mut layered, "LOG_FORMAT").unwrap_or_else(default_log_format);
        let database_url =
            take_string(&mut layered, "DATABASE_URL").unwrap_or_else(default_database_url);
        let db_max_connections = take_parsed(&mut layered, "DB_MAX_CONNECTIONS")?
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = take_parsed(&mut layered, "DB_ACQUIRE_TIMEOUT_MS")?
            .unwrap_or_else(default_db_acquire_timeout_ms);

        let openai_api_key = take_string(&mut layered, "OPENAI_API_KEY");
        let openai_api_base =
            take_string(&mut layered, "OPENAI_API_BASE").unwrap_or_else(default_openai_api_base);
        let keboola_api_token = take_string(&mut layered, "KEBOOLA_API_TOKEN");
        let http_timeout_seconds = take_parsed(&mut layered, "HTTP_TIMEOUT_SECONDS")?
            .unwrap_or_else(default_http_timeout_seconds);

        let orchestrator = OrchestratorConfig {
            tick_interval_seconds: take_parsed(&mut layered, "ORCHESTRATOR_TICK_INTERVAL_SECONDS")?
                .unwrap_or_else(default_orchestrator_tick_interval_seconds),
            min_sleep_ms: take_parsed(&mut layered, "ORCHESTRATOR_MIN_SLEEP_MS")?
                .unwrap_or_else(default_orchestrator_min_sleep_ms),
            max_concurrency: take_parsed(&mut layered, "ORCHESTRATOR_MAX_CONCURRENCY")?
                .unwrap_or_else(default_orchestrator_max_concurrency),
            due_batch_limit: take_parsed(&mut layered, "ORCHESTRATOR_DUE_BATCH_LIMIT")?
                .unwrap_or_else(default_orchestrator_due_batch_limit),
            shutdown_grace_seconds: take_parsed(
                &mut layered,
                "ORCHESTRATOR_SHUTDOWN_GRACE_SECONDS",
            )?
            .unwrap_or_else(default_orchestrator_shutdown_grace_seconds),
        };

        let retry = RetryPolicyConfig {
            base_delay_ms: take_parsed(&mut layered, "RETRY_BASE_DELAY_MS")?
                .unwrap_or_else(default_retry_base_delay_ms),
            max_delay_ms: take_parsed(&mut layered, "RETRY_MAX_DELAY_MS")?
                .unwrap_or_else(default_retry_max_delay_ms),
            max_attempts: take_parsed(&mut layered, "RETRY_MAX_ATTEMPTS")?
                .unwrap_or_else(default_retry_max_attempts),
        };

        let poll_interval = PollIntervalConfig {
            min_seconds: take_parsed(&mut layered, "POLL_INTERVAL_MIN_SECONDS")?
                .unwrap_or_else(default_poll_interval_min_seconds),
            max_seconds: take_parsed(&mut layered, "POLL_INTERVAL_MAX_SECONDS")?
                .unwrap_or_else(default_poll_interval_max_seconds),
            default_seconds: take_parsed(&mut layered, "POLL_INTERVAL_DEFAULT_SECONDS")?
                .unwrap_or_else(default_poll_interval_default_seconds),
        };

        let config = AppConfig {
            profile,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            openai_api_key,
            openai_api_base,
            keboola_api_token,
            http_timeout_seconds,
            orchestrator,
            retry,
            poll_interval,
        };

        config.validate()?;
        Ok(config)
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn take_string(layered: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    layered
        .remove(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn take_parsed<T: std::str::FromStr>(
    layered: &mut BTreeMap<String, String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match take_string(layered, key) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber {
                key: format!("{ENV_PREFIX}{key}"),
                value: raw,
            }),
    }
}
