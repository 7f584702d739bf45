#[macro_use]
extern crate tracing;

mod app_config;
mod args;
mod duration;

pub use app_config::get_config_dir;
pub use args::Args;
use serde::Deserialize;
use std::{
    fmt,
    net::SocketAddr,
    time::Duration,
};

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_BILLING_LOOKBACK: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_JOBS_LOOKBACK: Duration = Duration::from_secs(2 * 60 * 60);
pub const DEFAULT_PIPELINES_LOOKBACK: Duration = Duration::from_secs(2 * 60 * 60);
pub const DEFAULT_QUERIES_LOOKBACK: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_SLA_THRESHOLD_SECONDS: u64 = 3600;
pub const DEFAULT_TABLE_CHECK_INTERVAL: u32 = 10;

/// Settings shared by every scrape. Built once at start-up and read-only afterwards.
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub server_hostname: String,
    pub warehouse_http_path: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(deserialize_with = "duration::deserialize")]
    pub query_timeout: Duration,
    #[serde(deserialize_with = "duration::deserialize")]
    pub billing_lookback: Duration,
    #[serde(deserialize_with = "duration::deserialize")]
    pub jobs_lookback: Duration,
    #[serde(deserialize_with = "duration::deserialize")]
    pub pipelines_lookback: Duration,
    #[serde(deserialize_with = "duration::deserialize")]
    pub queries_lookback: Duration,
    pub sla_threshold_seconds: u64,
    #[serde(default)]
    pub collect_task_retries: bool,
    pub table_check_interval: u32,
    pub listen_address: SocketAddr,
    pub telemetry_path: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("server_hostname must be specified")]
    MissingServerHostname,
    #[error("warehouse_http_path must be specified")]
    MissingWarehouseHttpPath,
    #[error("client_id must be specified")]
    MissingClientId,
    #[error("client_secret must be specified")]
    MissingClientSecret,
    #[error("table_check_interval must be at least 1")]
    TableCheckInterval,
    #[error("sla_threshold_seconds must be greater than 0")]
    SlaThreshold,
    #[error("telemetry_path must start with '/' and not be '/' or '/healthz', got {0:?}")]
    TelemetryPath(String),
}

const DEFAULT_CONFIG: &str = include_str!("default-config.yaml");

impl Default for Config {
    fn default() -> Self {
        serde_yml::from_str(DEFAULT_CONFIG).expect("Failed to parse default config")
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secret = if self.client_secret.is_empty() { "" } else { "<redacted>" };
        f.debug_struct("Config")
            .field("server_hostname", &self.server_hostname)
            .field("warehouse_http_path", &self.warehouse_http_path)
            .field("client_id", &self.client_id)
            .field("client_secret", &secret)
            .field("query_timeout", &self.query_timeout)
            .field("billing_lookback", &self.billing_lookback)
            .field("jobs_lookback", &self.jobs_lookback)
            .field("pipelines_lookback", &self.pipelines_lookback)
            .field("queries_lookback", &self.queries_lookback)
            .field("sla_threshold_seconds", &self.sla_threshold_seconds)
            .field("collect_task_retries", &self.collect_task_retries)
            .field("table_check_interval", &self.table_check_interval)
            .field("listen_address", &self.listen_address)
            .field("telemetry_path", &self.telemetry_path)
            .finish()
    }
}

impl Config {
    /// Layers the embedded defaults, the YAML config file and the command line (flags and env vars), in that order.
    pub fn new(args: &Args) -> Result<Self, config::ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Yaml));

        builder = match &args.config_file {
            Some(path) => {
                debug!(?path, "Loading config file");
                builder.add_source(config::File::from(path.as_path()).format(config::FileFormat::Yaml).required(true))
            }
            None => {
                let path = get_config_dir().join("config.yaml");
                debug!(?path, "Looking for optional config file");
                builder.add_source(config::File::from(path).format(config::FileFormat::Yaml).required(false))
            }
        };

        builder = builder.add_source(args.clone());

        let cfg: Self = builder.build()?.try_deserialize()?;

        Ok(cfg)
    }

    /// Checks that everything needed to reach the warehouse is present and that the tunables are usable.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.server_hostname.trim().is_empty() {
            return Err(ValidationError::MissingServerHostname);
        }
        if self.warehouse_http_path.trim().is_empty() {
            return Err(ValidationError::MissingWarehouseHttpPath);
        }
        if self.client_id.trim().is_empty() {
            return Err(ValidationError::MissingClientId);
        }
        if self.client_secret.is_empty() {
            return Err(ValidationError::MissingClientSecret);
        }
        if self.table_check_interval < 1 {
            return Err(ValidationError::TableCheckInterval);
        }
        if self.sla_threshold_seconds == 0 {
            return Err(ValidationError::SlaThreshold);
        }
        if !self.telemetry_path.starts_with('/') || matches!(self.telemetry_path.as_str(), "/" | "/healthz") {
            return Err(ValidationError::TelemetryPath(self.telemetry_path.clone()));
        }
        Ok(())
    }

    pub fn query_timeout(&self) -> Duration {
        or_default(self.query_timeout, DEFAULT_QUERY_TIMEOUT)
    }

    pub fn billing_lookback(&self) -> Duration {
        or_default(self.billing_lookback, DEFAULT_BILLING_LOOKBACK)
    }

    pub fn jobs_lookback(&self) -> Duration {
        or_default(self.jobs_lookback, DEFAULT_JOBS_LOOKBACK)
    }

    pub fn pipelines_lookback(&self) -> Duration {
        or_default(self.pipelines_lookback, DEFAULT_PIPELINES_LOOKBACK)
    }

    pub fn queries_lookback(&self) -> Duration {
        or_default(self.queries_lookback, DEFAULT_QUERIES_LOOKBACK)
    }

    pub fn sla_threshold_seconds(&self) -> u64 {
        if self.sla_threshold_seconds == 0 {
            DEFAULT_SLA_THRESHOLD_SECONDS
        } else {
            self.sla_threshold_seconds
        }
    }

    pub fn table_check_interval(&self) -> u32 {
        self.table_check_interval.max(1)
    }

    /// The warehouse id is the last segment of the HTTP path, e.g. `/sql/1.0/warehouses/abc123` -> `abc123`.
    pub fn warehouse_id(&self) -> &str {
        self.warehouse_http_path.trim_end_matches('/').rsplit('/').next().unwrap_or_default()
    }
}

fn or_default(value: Duration, default: Duration) -> Duration {
    if value.is_zero() {
        default
    } else {
        value
    }
}
