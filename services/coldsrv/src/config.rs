//! Service configuration
//!
//! Layers, lowest priority first: built-in defaults, the YAML file,
//! `COLDSRV_` environment variables (`__` separates nested keys, e.g.
//! `COLDSRV_POLLING__PERIOD_MS=500`).

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use coldroom_modbus::constants::{base_address, DEFAULT_PORT};
use errors::{ColdroomError, Result};
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "config/coldsrv.yaml";

/// Environment prefix for overrides
pub const ENV_PREFIX: &str = "COLDSRV_";

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Seed for the device catalogue
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Tick period
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
    /// Per Modbus request
    #[serde(default = "default_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Keep events and history in memory only
    #[serde(default)]
    pub in_memory: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: String,
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

/// One cold-room controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DeviceConfig {
    pub id: i64,
    pub name: String,
    pub host: String,
    #[serde(default = "default_device_port")]
    pub port: u16,
    /// Modbus unit id
    #[serde(default = "default_unit")]
    pub unit: u8,
    /// First holding register, 4xxxx notation
    #[serde(default = "default_address")]
    pub address: u32,
    #[serde(default)]
    pub enable_co2_proportional_ctrl: bool,
    #[serde(default)]
    pub enable_c2h4_proportional_ctrl: bool,
}

impl DeviceConfig {
    pub fn new(id: i64, name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            name: name.into(),
            host: host.into(),
            port,
            unit: default_unit(),
            address: default_address(),
            enable_co2_proportional_ctrl: false,
            enable_c2h4_proportional_ctrl: false,
        }
    }

    /// Protocol address of register 0 of the map
    pub fn base_address(&self) -> u16 {
        base_address(self.address)
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_service_name() -> String {
    "coldsrv".to_string()
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    6100
}

fn default_period_ms() -> u64 {
    2000
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_db_path() -> String {
    "data/coldsrv.db".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_device_port() -> u16 {
    DEFAULT_PORT
}

fn default_unit() -> u8 {
    1
}

fn default_address() -> u32 {
    40001
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            period_ms: default_period_ms(),
            request_timeout_ms: default_timeout_ms(),
            connect_timeout_ms: default_timeout_ms(),
        }
    }
}

impl PollingConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            in_memory: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load defaults < YAML file < environment.
    ///
    /// A missing file at the default location is not an error; an explicit
    /// path that does not exist is.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let figment = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(ColdroomError::Configuration(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                Self::figment(path)
            },
            None => Self::figment(Path::new(DEFAULT_CONFIG_PATH)),
        };
        Self::extract(figment)
    }

    /// Figment with all layers, exposed for tests that add their own
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn extract(figment: Figment) -> Result<Self> {
        let config: AppConfig = figment
            .extract()
            .map_err(|e| ColdroomError::Configuration(format!("Failed to load configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.polling.period_ms == 0 {
            return Err(invalid("polling.period_ms", "must be greater than 0"));
        }
        if self.polling.request_timeout_ms == 0 {
            return Err(invalid("polling.request_timeout_ms", "must be greater than 0"));
        }
        if self.api.port == 0 {
            return Err(invalid("api.port", "must not be 0"));
        }
        validate_devices(&self.devices)
    }

    /// `host:port` for the HTTP listener
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}

/// Device list checks shared by the config loader and the device API
pub fn validate_devices(devices: &[DeviceConfig]) -> Result<()> {
    let mut seen = HashSet::new();
    for (i, device) in devices.iter().enumerate() {
        if !seen.insert(device.id) {
            return Err(invalid(
                &format!("devices[{i}].id"),
                &format!("duplicate device id {}", device.id),
            ));
        }
        if device.host.trim().is_empty() {
            return Err(invalid(&format!("devices[{i}].host"), "must not be empty"));
        }
        if device.port == 0 {
            return Err(invalid(&format!("devices[{i}].port"), "must not be 0"));
        }
    }
    Ok(())
}

fn invalid(field: &str, reason: &str) -> ColdroomError {
    ColdroomError::InvalidConfig {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
