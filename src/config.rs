//! Runtime configuration, read from `~/.meetsync/config.json`.
//!
//! Only `endpoint` is required. `MEETSYNC_CONFIG` points at another file and
//! `MEETSYNC_ENDPOINT` overrides the gateway URL.

use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const CONFIG_PATH_ENV: &str = "MEETSYNC_CONFIG";
pub const ENDPOINT_ENV: &str = "MEETSYNC_ENDPOINT";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway REST base URL; methods are appended to it.
    #[serde(default)]
    pub endpoint: String,
    /// Sent as `auth` in every request body when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Custom profile field holding chat nicknames.
    #[serde(default = "default_nickname_field")]
    pub nickname_field: String,
    #[serde(default = "default_workday_start")]
    pub workday_start_hour: u32,
    #[serde(default = "default_workday_end")]
    pub workday_end_hour: u32,
    #[serde(default = "default_horizon_days")]
    pub horizon_days: usize,
    #[serde(default = "default_min_slot")]
    pub min_slot_minutes: i64,
    #[serde(default = "default_meeting_duration")]
    pub meeting_duration_minutes: i64,
    #[serde(default = "default_guest_batch")]
    pub guest_batch_size: u64,
    #[serde(default = "default_guest_floor")]
    pub guest_scan_floor: u64,
    #[serde(default = "default_guest_multiplier")]
    pub guest_scan_multiplier: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_timezone() -> String {
    "Asia/Novosibirsk".to_string()
}
fn default_nickname_field() -> String {
    "UF_USR_1678964886664".to_string()
}
fn default_workday_start() -> u32 {
    9
}
fn default_workday_end() -> u32 {
    19
}
fn default_horizon_days() -> usize {
    5
}
fn default_min_slot() -> i64 {
    30
}
fn default_meeting_duration() -> i64 {
    60
}
fn default_guest_batch() -> u64 {
    100
}
fn default_guest_floor() -> u64 {
    2000
}
fn default_guest_multiplier() -> u64 {
    3
}
fn default_request_timeout() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            access_token: None,
            timezone: default_timezone(),
            nickname_field: default_nickname_field(),
            workday_start_hour: default_workday_start(),
            workday_end_hour: default_workday_end(),
            horizon_days: default_horizon_days(),
            min_slot_minutes: default_min_slot(),
            meeting_duration_minutes: default_meeting_duration(),
            guest_batch_size: default_guest_batch(),
            guest_scan_floor: default_guest_floor(),
            guest_scan_multiplier: default_guest_multiplier(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Config {
    /// Parsed time zone. Only valid after [`Config::validate`].
    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or(chrono_tz::Asia::Novosibirsk)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("endpoint is required".into()));
        }
        if self.timezone.parse::<Tz>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "unknown timezone: {}",
                self.timezone
            )));
        }
        if self.workday_start_hour >= self.workday_end_hour || self.workday_end_hour > 24 {
            return Err(ConfigError::Invalid(format!(
                "invalid working window {}:00-{}:00",
                self.workday_start_hour, self.workday_end_hour
            )));
        }
        if self.horizon_days == 0
            || self.min_slot_minutes <= 0
            || self.meeting_duration_minutes <= 0
            || self.guest_batch_size == 0
        {
            return Err(ConfigError::Invalid(
                "horizon, durations and batch size must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Default config location: `~/.meetsync/config.json`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .unwrap_or_default()
        .join(".meetsync")
        .join("config.json")
}

/// Load, apply env overrides, and validate.
pub fn load_config() -> Result<Config, ConfigError> {
    let mut config = load_config_from(&config_path())?;
    if let Ok(endpoint) = std::env::var(ENDPOINT_ENV) {
        config.endpoint = endpoint;
    }
    config.validate()?;
    Ok(config)
}

/// Read a config file without env overrides or validation.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(serde_json::from_str(&content)?)
}
