use clap::Parser;
use std::{
    net::SocketAddr,
    path::PathBuf,
};

/// Prometheus exporter for Databricks system tables.
///
/// Every flag can also be given through its environment variable or the YAML config file. Flags win over the file,
/// the file wins over the built-in defaults.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version = version(), about, long_about = None)]
pub struct Args {
    /// Path to a YAML config file. Defaults to `config.yaml` in the config directory, if present.
    #[clap(long, env = "DATABRICKS_EXPORTER_CONFIG_FILE", value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// The Databricks workspace hostname (e.g., dbc-abc123-def456.cloud.databricks.com).
    #[clap(long, env = "DATABRICKS_EXPORTER_SERVER_HOSTNAME", value_name = "HOST")]
    pub server_hostname: Option<String>,

    /// The HTTP path of the SQL Warehouse (e.g., /sql/1.0/warehouses/abc123def456).
    #[clap(long, env = "DATABRICKS_EXPORTER_WAREHOUSE_HTTP_PATH", value_name = "PATH")]
    pub warehouse_http_path: Option<String>,

    /// The OAuth2 Client ID (Application ID) for Service Principal authentication.
    #[clap(long, env = "DATABRICKS_EXPORTER_CLIENT_ID", value_name = "ID")]
    pub client_id: Option<String>,

    /// The OAuth2 Client Secret for Service Principal authentication.
    #[clap(long, env = "DATABRICKS_EXPORTER_CLIENT_SECRET", value_name = "SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Timeout for the query phase of a single scrape.
    #[clap(long, env = "DATABRICKS_EXPORTER_QUERY_TIMEOUT", value_name = "DURATION")]
    pub query_timeout: Option<String>,

    /// How far back to look for billing data.
    #[clap(long, env = "DATABRICKS_EXPORTER_BILLING_LOOKBACK", value_name = "DURATION")]
    pub billing_lookback: Option<String>,

    /// How far back to look for job runs.
    #[clap(long, env = "DATABRICKS_EXPORTER_JOBS_LOOKBACK", value_name = "DURATION")]
    pub jobs_lookback: Option<String>,

    /// How far back to look for pipeline runs.
    #[clap(long, env = "DATABRICKS_EXPORTER_PIPELINES_LOOKBACK", value_name = "DURATION")]
    pub pipelines_lookback: Option<String>,

    /// How far back to look for SQL warehouse queries.
    #[clap(long, env = "DATABRICKS_EXPORTER_QUERIES_LOOKBACK", value_name = "DURATION")]
    pub queries_lookback: Option<String>,

    /// Duration threshold (in seconds) for job SLA miss detection.
    #[clap(long = "sla-threshold", env = "DATABRICKS_EXPORTER_SLA_THRESHOLD", value_name = "SECONDS")]
    pub sla_threshold_seconds: Option<u64>,

    /// Collect task retry metrics (high cardinality due to the task_key label).
    #[clap(
        long,
        env = "DATABRICKS_EXPORTER_COLLECT_TASK_RETRIES",
        num_args = 0..=1,
        default_missing_value = "true",
        value_name = "BOOL"
    )]
    pub collect_task_retries: Option<bool>,

    /// Number of scrapes between re-checks of optional system tables that were found missing.
    #[clap(long, env = "DATABRICKS_EXPORTER_TABLE_CHECK_INTERVAL", value_name = "SCRAPES")]
    pub table_check_interval: Option<u32>,

    /// Address on which to expose metrics and the landing page.
    #[clap(long = "web.listen-address", env = "DATABRICKS_EXPORTER_WEB_LISTEN_ADDRESS", value_name = "ADDR")]
    pub listen_address: Option<SocketAddr>,

    /// Path under which to expose metrics.
    #[clap(long = "web.telemetry-path", env = "DATABRICKS_EXPORTER_WEB_TELEMETRY_PATH", value_name = "PATH")]
    pub telemetry_path: Option<String>,

    /// Log filter, e.g. `info` or `databricks_exporter_collector=debug`. `RUST_LOG` wins if set.
    #[clap(long = "log.level", env = "DATABRICKS_EXPORTER_LOG_LEVEL", default_value = "info", value_name = "FILTER")]
    pub log_level: String,
}

mod config_ext {
    use super::*;
    use config::{
        Map,
        Source,
        Value,
    };
    use std::collections::HashMap;

    impl Source for Args {
        fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
            Box::new((*self).clone())
        }

        fn collect(&self) -> Result<Map<String, Value>, config::ConfigError> {
            let mut cache = HashMap::<String, Value>::new();
            let strings = [
                ("server_hostname", &self.server_hostname),
                ("warehouse_http_path", &self.warehouse_http_path),
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
                ("query_timeout", &self.query_timeout),
                ("billing_lookback", &self.billing_lookback),
                ("jobs_lookback", &self.jobs_lookback),
                ("pipelines_lookback", &self.pipelines_lookback),
                ("queries_lookback", &self.queries_lookback),
                ("telemetry_path", &self.telemetry_path),
            ];
            for (key, value) in strings {
                if let Some(value) = value {
                    cache.insert(key.to_string(), value.clone().into());
                }
            }
            if let Some(seconds) = self.sla_threshold_seconds {
                cache.insert("sla_threshold_seconds".to_string(), seconds.into());
            }
            if let Some(collect) = self.collect_task_retries {
                cache.insert("collect_task_retries".to_string(), collect.into());
            }
            if let Some(interval) = self.table_check_interval {
                cache.insert("table_check_interval".to_string(), u64::from(interval).into());
            }
            if let Some(address) = self.listen_address {
                cache.insert("listen_address".to_string(), address.to_string().into());
            }
            Ok(cache)
        }
    }
}

pub fn version() -> String {
    let version = clap::crate_version!();
    let config_dir_path = crate::get_config_dir().display().to_string();

    format!(
        "\
{version}

Config directory: {config_dir_path}"
    )
}
