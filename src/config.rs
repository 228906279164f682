//! Application configuration.
//!
//! Every value a component needs is carried in an explicit struct and handed
//! over at construction time. The environment is read exactly once, by
//! `ScreeningConfig::from_env()`, which only the binary calls.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::pipeline::normalizer::RiskPolicy;
use crate::pipeline::preparation::PreparationConfig;
use crate::pipeline::transport::BackendContract;

/// Application-level constants
pub const APP_NAME: &str = "AnemoDx";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default backend address for a locally running inference server.
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";

/// Default address of the auxiliary capture peripheral on the local network.
pub const DEFAULT_DEVICE_URL: &str = "http://192.168.1.8";

/// Default bearer token shared with the capture peripheral firmware.
pub const DEFAULT_DEVICE_TOKEN: &str = "esp32cam";

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "anemodx=info"
}

/// Get the application data directory.
/// ~/AnemoDx/ on all platforms, falling back to the working directory
/// when no home directory can be determined.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Path of the profile/scan database inside a data directory.
pub fn database_path(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("profiles.db")
}

/// Directory where images pulled from the capture peripheral are written.
pub fn capture_cache_dir(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("captures")
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Backend URL must start with http:// or https://, got {0}")]
    InvalidUrl(String),
}

// ═══════════════════════════════════════════════════════════
// Backend
// ═══════════════════════════════════════════════════════════

/// How to reach the remote inference backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub contract: BackendContract,
    /// Deadline for `GET /health`.
    pub health_timeout: Duration,
    /// Deadline for a prediction carrying one image.
    pub single_image_timeout: Duration,
    /// Deadline for a prediction carrying several images.
    pub multi_image_timeout: Duration,
    /// TCP connect deadline, applied inside every request deadline.
    pub connect_timeout: Duration,
}

impl BackendConfig {
    pub fn new(base_url: &str, contract: BackendContract) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            contract,
            health_timeout: Duration::from_secs(5),
            single_image_timeout: Duration::from_secs(15),
            multi_image_timeout: Duration::from_secs(25),
            connect_timeout: Duration::from_secs(5),
        }
    }

    /// Deadline for a prediction carrying `image_count` images.
    pub fn predict_timeout(&self, image_count: usize) -> Duration {
        if image_count > 1 {
            self.multi_image_timeout
        } else {
            self.single_image_timeout
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BACKEND_URL, BackendContract::Analyze)
    }
}

// ═══════════════════════════════════════════════════════════
// Capture peripheral
// ═══════════════════════════════════════════════════════════

/// How to reach the auxiliary capture peripheral.
#[derive(Clone)]
pub struct CaptureDeviceConfig {
    pub base_url: String,
    pub bearer_token: String,
    pub health_timeout: Duration,
    pub capture_timeout: Duration,
}

impl CaptureDeviceConfig {
    pub fn new(base_url: &str, bearer_token: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token: bearer_token.to_string(),
            health_timeout: Duration::from_secs(3),
            capture_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for CaptureDeviceConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DEVICE_URL, DEFAULT_DEVICE_TOKEN)
    }
}

// Token stays out of logs.
impl std::fmt::Debug for CaptureDeviceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureDeviceConfig")
            .field("base_url", &self.base_url)
            .field("bearer_token", &"<redacted>")
            .field("health_timeout", &self.health_timeout)
            .field("capture_timeout", &self.capture_timeout)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════
// Aggregate
// ═══════════════════════════════════════════════════════════

/// Everything the screening client needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct ScreeningConfig {
    pub backend: BackendConfig,
    pub device: CaptureDeviceConfig,
    pub preparation: PreparationConfig,
    pub risk_policy: RiskPolicy,
    /// Skip `GET /health` before each prediction and rely on the prediction's
    /// own error reporting.
    pub skip_health_check: bool,
    pub data_dir: PathBuf,
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            device: CaptureDeviceConfig::default(),
            preparation: PreparationConfig::default(),
            risk_policy: RiskPolicy::default(),
            skip_health_check: false,
            data_dir: app_data_dir(),
        }
    }
}

impl ScreeningConfig {
    /// Build configuration from `ANEMODX_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup (testable seam for `from_env`).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        let contract = match lookup("ANEMODX_CONTRACT") {
            Some(value) => value
                .parse::<BackendContract>()
                .map_err(|_| ConfigError::InvalidValue {
                    key: "ANEMODX_CONTRACT",
                    value,
                })?,
            None => BackendContract::Analyze,
        };

        let base_url = lookup("ANEMODX_BACKEND_URL").unwrap_or_else(|| DEFAULT_BACKEND_URL.into());
        validate_url(&base_url)?;
        config.backend = BackendConfig::new(&base_url, contract);

        if let Some(value) = lookup("ANEMODX_RISK_POLICY") {
            config.risk_policy = value
                .parse::<RiskPolicy>()
                .map_err(|_| ConfigError::InvalidValue {
                    key: "ANEMODX_RISK_POLICY",
                    value,
                })?;
        }

        if let Some(value) = lookup("ANEMODX_SKIP_HEALTH_CHECK") {
            config.skip_health_check = matches!(value.as_str(), "1" | "true" | "TRUE" | "yes");
        }

        let device_url = lookup("ANEMODX_DEVICE_URL").unwrap_or_else(|| DEFAULT_DEVICE_URL.into());
        validate_url(&device_url)?;
        let token = lookup("ANEMODX_DEVICE_TOKEN").unwrap_or_else(|| DEFAULT_DEVICE_TOKEN.into());
        config.device = CaptureDeviceConfig::new(&device_url, &token);

        if let Some(dir) = lookup("ANEMODX_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        Ok(config)
    }
}

fn validate_url(url: &str) -> Result<(), ConfigError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::InvalidUrl(url.to_string()))
    }
}
