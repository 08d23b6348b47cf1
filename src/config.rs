use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::trace;

/// Kind of dependency a service configuration describes
///
/// Only `Http` has a prober today; the other kinds are accepted in the
/// configuration so that they can be listed, and probe as Critical until a
/// prober is registered for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    #[default]
    Http,
    Db,
    Sns,
    Sqs,
    Rabbitmq,
    Certificate,
    Resource,
    Network,
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServiceType::Http => "http",
            ServiceType::Db => "db",
            ServiceType::Sns => "sns",
            ServiceType::Sqs => "sqs",
            ServiceType::Rabbitmq => "rabbitmq",
            ServiceType::Certificate => "certificate",
            ServiceType::Resource => "resource",
            ServiceType::Network => "network",
        };
        write!(f, "{name}")
    }
}

/// Probe settings for one monitored service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfiguration {
    pub id: String,

    pub name: String,

    #[serde(rename = "type", default)]
    pub service_type: ServiceType,

    /// Probe target (URL for HTTP services)
    pub target: String,

    #[serde(default = "default_expected_response_code")]
    pub expected_response_code: u16,

    /// HTTP method name, case-insensitive
    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default)]
    pub request_body: Option<String>,

    #[serde(default)]
    pub query: Option<String>,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,

    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
}

impl ServiceConfiguration {
    /// Configuration with every optional field at its default
    pub fn new(id: impl Into<String>, name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            service_type: ServiceType::Http,
            target: target.into(),
            expected_response_code: default_expected_response_code(),
            method: default_method(),
            request_body: None,
            query: None,
            timeout_seconds: default_timeout_seconds(),
            interval_minutes: default_interval_minutes(),
            headers: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }
}

impl Default for ServiceConfiguration {
    fn default() -> Self {
        Self::new("", "", "")
    }
}

fn default_expected_response_code() -> u16 {
    200
}

fn default_method() -> String {
    String::from("GET")
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_interval_minutes() -> u64 {
    1
}

/// SLA targets applied by the trend engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlaTarget {
    /// Target availability in percent (e.g. `99.9`)
    #[serde(default = "default_availability_percentage")]
    pub availability_percentage: f64,

    #[serde(default = "default_response_time_seconds")]
    pub response_time_seconds: f64,
}

impl SlaTarget {
    /// Target availability as a fraction in `[0, 1]`
    pub fn availability_fraction(&self) -> f64 {
        self.availability_percentage / 100.0
    }

    pub fn response_time(&self) -> Duration {
        Duration::from_secs_f64(self.response_time_seconds.max(0.0))
    }
}

impl Default for SlaTarget {
    fn default() -> Self {
        Self {
            availability_percentage: default_availability_percentage(),
            response_time_seconds: default_response_time_seconds(),
        }
    }
}

fn default_availability_percentage() -> f64 {
    99.9
}

fn default_response_time_seconds() -> f64 {
    1.0
}

/// Options for periodic trend calculation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendsConfig {
    /// Period of the system-wide refresh
    #[serde(default = "default_calculation_interval_minutes")]
    pub calculation_interval_minutes: u64,

    /// Records older than this are dropped on every system-wide refresh
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    #[serde(default)]
    pub sla: SlaTarget,
}

impl TrendsConfig {
    pub fn calculation_interval(&self) -> Duration {
        Duration::from_secs(self.calculation_interval_minutes * 60)
    }

    pub fn retention_period(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }
}

impl Default for TrendsConfig {
    fn default() -> Self {
        Self {
            calculation_interval_minutes: default_calculation_interval_minutes(),
            retention_days: default_retention_days(),
            sla: SlaTarget::default(),
        }
    }
}

fn default_calculation_interval_minutes() -> u64 {
    15
}

fn default_retention_days() -> u32 {
    30
}

/// Storage backend configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database
    Sqlite {
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./health-trends.db")
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub services: Vec<ServiceConfiguration>,

    /// Storage configuration (optional - defaults to in-memory)
    pub storage: Option<StorageConfig>,

    #[serde(default)]
    pub trends: TrendsConfig,
}

/// Configuration contract violations, fatal at startup
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("service at position {0} has an empty id")]
    EmptyId(usize),

    #[error("service id '{0}' is configured more than once")]
    DuplicateId(String),

    #[error("service '{id}': {reason}")]
    InvalidService { id: String, reason: String },

    #[error("invalid trend options: {0}")]
    InvalidTrends(String),
}

impl Config {
    /// Check the configuration contract
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();

        for (index, service) in self.services.iter().enumerate() {
            if service.id.trim().is_empty() {
                return Err(ConfigError::EmptyId(index));
            }
            if !seen.insert(service.id.as_str()) {
                return Err(ConfigError::DuplicateId(service.id.clone()));
            }

            let invalid = |reason: &str| ConfigError::InvalidService {
                id: service.id.clone(),
                reason: reason.to_string(),
            };

            if service.interval_minutes == 0 {
                return Err(invalid("interval_minutes must be at least 1"));
            }
            if service.timeout_seconds == 0 {
                return Err(invalid("timeout_seconds must be at least 1"));
            }
            if service.service_type == ServiceType::Http
                && !(service.target.starts_with("http://") || service.target.starts_with("https://"))
            {
                return Err(invalid("target must be an http(s) URL"));
            }
            if reqwest::Method::from_bytes(service.method.to_uppercase().as_bytes()).is_err() {
                return Err(invalid("method is not a valid HTTP method"));
            }
        }

        if self.trends.calculation_interval_minutes == 0 {
            return Err(ConfigError::InvalidTrends(
                "calculation_interval_minutes must be at least 1".to_string(),
            ));
        }
        let sla = &self.trends.sla;
        if !(0.0..=100.0).contains(&sla.availability_percentage) {
            return Err(ConfigError::InvalidTrends(format!(
                "availability_percentage {} is outside 0..=100",
                sla.availability_percentage
            )));
        }
        if sla.response_time_seconds <= 0.0 {
            return Err(ConfigError::InvalidTrends(
                "response_time_seconds must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

pub fn read_config_file(path: &str) -> Result<Config, ConfigError> {
    let file_content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_string(),
        source,
    })?;
    let config: Config = serde_json::from_str(&file_content)?;
    trace!("loaded config: {config:?}");
    config.validate()?;
    Ok(config)
}
