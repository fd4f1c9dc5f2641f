//! Settings file management

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::HotswapError;
use crate::hotswap::deployments::HotswapMode;
use crate::hotswap::waiter;
use crate::logs::LogLevel;

/// Hotswap settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub json_logs: bool,

    /// Optional file that receives a copy of the logs
    #[serde(default)]
    pub log_file: Option<String>,

    /// AWS settings
    #[serde(default)]
    pub aws: AwsSettings,

    /// What to do with changes that cannot be hotswapped
    #[serde(default)]
    pub mode: HotswapMode,

    /// Deployment waiter settings
    #[serde(default)]
    pub waiter: WaiterSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            json_logs: false,
            log_file: None,
            aws: AwsSettings::default(),
            mode: HotswapMode::default(),
            waiter: WaiterSettings::default(),
        }
    }
}

impl Settings {
    /// Read settings from a JSON file
    pub async fn load(path: &Path) -> Result<Self, HotswapError> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            HotswapError::ConfigError(format!("Unable to read {}: {}", path.display(), e))
        })?;
        let settings: Settings = serde_json::from_str(&contents)?;
        if settings.waiter.max_attempts == 0 {
            return Err(HotswapError::ConfigError(
                "waiter.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(settings)
    }

    /// Waiter options derived from the settings
    pub fn waiter_options(&self) -> waiter::Options {
        waiter::Options {
            delay: Duration::from_secs(self.waiter.delay_secs),
            max_attempts: self.waiter.max_attempts,
        }
    }
}

/// AWS settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsSettings {
    /// Named profile from the shared config and credentials files
    #[serde(default)]
    pub profile: Option<String>,

    /// Region; falls back to the SDK's region chain
    #[serde(default)]
    pub region: Option<String>,

    /// Send every call to this endpoint instead of the regional one
    #[serde(default)]
    pub endpoint_url: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for AwsSettings {
    fn default() -> Self {
        Self {
            profile: None,
            region: None,
            endpoint_url: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Deployment waiter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaiterSettings {
    /// Delay between polls in seconds
    #[serde(default = "default_waiter_delay")]
    pub delay_secs: u64,

    /// Maximum number of polls
    #[serde(default = "default_waiter_max_attempts")]
    pub max_attempts: u32,
}

fn default_waiter_delay() -> u64 {
    10
}

fn default_waiter_max_attempts() -> u32 {
    60
}

impl Default for WaiterSettings {
    fn default() -> Self {
        Self {
            delay_secs: default_waiter_delay(),
            max_attempts: default_waiter_max_attempts(),
        }
    }
}
