//! Centralized configuration for apilens.
//!
//! Constants live on unit structs, as defaults for every tunable. An optional
//! YAML settings file (`ProbeSettings`) overrides them at runtime:
//!
//! ```yaml
//! version: "1"
//! schemas_dir: ./schemas
//! executor:
//!   max_retries: 3
//!   raw_mode: false
//!   disable_circuit_breaker: false
//!   failure_threshold: 5
//!   reset_timeout_ms: 60000
//!   volume_threshold: 10
//!   error_threshold_percentage: 50
//! ```

use crate::network::{CircuitBreakerConfig, ExecuteOptions, ExecutorConfig, RetryConfig};
use crate::{ProbeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const APP_NAME: &'static str = "apilens";
    pub const USER_AGENT: &'static str = concat!("apilens/", env!("CARGO_PKG_VERSION"));
    pub const SCHEMA_EXTENSIONS: &'static [&'static str] = &["yaml", "yml"];
    pub const DEFAULT_SCHEMAS_DIR: &'static str = "schemas";
    pub const CONFIG_FILE_NAME: &'static str = "apilens.yaml";
}

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const MAX_RETRIES: u32 = 3;
    pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(1000);
    pub const RETRY_MAX_DELAY: Duration = Duration::from_millis(30_000);
    pub const BACKOFF_MULTIPLIER: f64 = 2.0;
    pub const RAW_READ_CHUNK_SIZE: usize = 8192;
    /// Largest response body the raw transport will buffer.
    pub const RAW_MAX_BODY: usize = 64 * 1024 * 1024;
    pub const MAX_REDIRECTS: usize = 10;
}

/// Circuit breaker defaults.
pub struct CircuitBreakerDefaults;

impl CircuitBreakerDefaults {
    pub const FAILURE_THRESHOLD: u32 = 5;
    pub const RESET_TIMEOUT: Duration = Duration::from_millis(60_000);
    pub const VOLUME_THRESHOLD: u32 = 10;
    pub const ERROR_THRESHOLD_PERCENTAGE: f64 = 50.0;
}

/// Runtime settings loaded from an optional YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSettings {
    /// Settings format version
    #[serde(default = "default_version")]
    pub version: String,

    /// Directory scanned for schema files
    #[serde(default)]
    pub schemas_dir: Option<PathBuf>,

    #[serde(default)]
    pub executor: ExecutorSettings,
}

/// Executor knobs as they appear in the settings file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    pub max_retries: u32,
    pub raw_mode: bool,
    pub disable_circuit_breaker: bool,
    pub follow_redirects: bool,
    pub default_timeout_ms: u64,
    pub retry_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub retry_jitter: bool,
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    /// `None` disables volume gating.
    pub volume_threshold: Option<u32>,
    /// `None` disables percentage-based opening.
    pub error_threshold_percentage: Option<f64>,
    /// Defaults to half the failure threshold, rounded up.
    pub half_open_success_threshold: Option<u32>,
}

fn default_version() -> String {
    "1".to_string()
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            version: default_version(),
            schemas_dir: None,
            executor: ExecutorSettings::default(),
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_retries: NetworkConfig::MAX_RETRIES,
            raw_mode: false,
            disable_circuit_breaker: false,
            follow_redirects: true,
            default_timeout_ms: NetworkConfig::REQUEST_TIMEOUT.as_millis() as u64,
            retry_delay_ms: NetworkConfig::RETRY_BASE_DELAY.as_millis() as u64,
            retry_max_delay_ms: NetworkConfig::RETRY_MAX_DELAY.as_millis() as u64,
            backoff_multiplier: NetworkConfig::BACKOFF_MULTIPLIER,
            retry_jitter: false,
            failure_threshold: CircuitBreakerDefaults::FAILURE_THRESHOLD,
            reset_timeout_ms: CircuitBreakerDefaults::RESET_TIMEOUT.as_millis() as u64,
            volume_threshold: Some(CircuitBreakerDefaults::VOLUME_THRESHOLD),
            error_threshold_percentage: Some(CircuitBreakerDefaults::ERROR_THRESHOLD_PERCENTAGE),
            half_open_success_threshold: None,
        }
    }
}

impl ProbeSettings {
    /// Load settings from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ProbeError::io_with_path(e, path))?;
        let settings: ProbeSettings =
            serde_yaml::from_str(&content).map_err(|e| ProbeError::yaml_with_path(e, path))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let settings: ProbeSettings = serde_yaml::from_str(yaml)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from `path` if given, else from `apilens.yaml` in the working
    /// directory if it exists, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let local = Path::new(AppConfig::CONFIG_FILE_NAME);
                if local.is_file() {
                    Self::from_file(local)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.version.as_str() {
            "1" | "1.0" => {}
            v => {
                return Err(ProbeError::Config {
                    message: format!("unsupported settings version: {}", v),
                })
            }
        }
        self.executor.validate()
    }

    /// Directory to scan for schemas, falling back to `./schemas`.
    pub fn schemas_dir(&self) -> PathBuf {
        self.schemas_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(AppConfig::DEFAULT_SCHEMAS_DIR))
    }
}

impl ExecutorSettings {
    fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(ProbeError::Config {
                message: "executor.max_retries must be at least 1".into(),
            });
        }
        if self.failure_threshold == 0 {
            return Err(ProbeError::Config {
                message: "executor.failure_threshold must be at least 1".into(),
            });
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ProbeError::Config {
                message: "executor.backoff_multiplier must be >= 1.0".into(),
            });
        }
        if let Some(pct) = self.error_threshold_percentage {
            if !(0.0..=100.0).contains(&pct) {
                return Err(ProbeError::Config {
                    message: format!("executor.error_threshold_percentage out of range: {}", pct),
                });
            }
        }
        if self.half_open_success_threshold == Some(0) {
            return Err(ProbeError::Config {
                message: "executor.half_open_success_threshold must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            reset_timeout: Duration::from_millis(self.reset_timeout_ms),
            volume_threshold: self.volume_threshold,
            error_threshold_percentage: self.error_threshold_percentage,
            half_open_success_threshold: self.half_open_success_threshold,
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(self.max_retries)
            .with_base_delay(Duration::from_millis(self.retry_delay_ms))
            .with_max_delay(Duration::from_millis(self.retry_max_delay_ms))
            .with_multiplier(self.backoff_multiplier)
            .with_jitter(self.retry_jitter)
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            retry: self.retry_config(),
            circuit_breaker: self.circuit_breaker_config(),
            default_timeout: Duration::from_millis(self.default_timeout_ms),
        }
    }

    pub fn execute_options(&self) -> ExecuteOptions {
        ExecuteOptions {
            max_retries: Some(self.max_retries),
            raw_mode: self.raw_mode,
            disable_circuit_breaker: self.disable_circuit_breaker,
            follow_redirects: self.follow_redirects,
        }
    }
}
