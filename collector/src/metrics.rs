//! # Metric catalog
//!
//! Every series the exporter can produce, with its help text, kind and fixed label schema, plus the
//! [`MetricSink`] that collectors stream their [`Observation`]s into.

use std::sync::{
    Mutex,
    PoisonError,
};

pub const NAMESPACE: &str = "databricks";

pub const LABEL_WORKSPACE_ID: &str = "workspace_id";
pub const LABEL_SKU_NAME: &str = "sku_name";
pub const LABEL_JOB_ID: &str = "job_id";
pub const LABEL_JOB_NAME: &str = "job_name";
pub const LABEL_TASK_KEY: &str = "task_key";
pub const LABEL_PIPELINE_ID: &str = "pipeline_id";
pub const LABEL_PIPELINE_NAME: &str = "pipeline_name";
pub const LABEL_WAREHOUSE_ID: &str = "warehouse_id";
pub const LABEL_STATUS: &str = "status";
pub const LABEL_QUANTILE: &str = "quantile";
pub const LABEL_STAGE: &str = "stage";
pub const LABEL_DOMAIN: &str = "domain";

/// Quantile label values, in the column order the duration queries return them.
pub const QUANTILES: [&str; 3] = ["0.50", "0.95", "0.99"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::EnumIter)]
pub enum Metric {
    Up,
    ScrapeStatus,
    ScrapeDurationSeconds,

    BillingDbusTotal,
    BillingCostEstimateUsd,
    PriceChangeEvents,
    BillingExportErrorsTotal,

    JobRunsTotal,
    JobRunStatusTotal,
    JobRunDurationSeconds,
    TaskRetriesTotal,
    JobSlaMissTotal,

    PipelineRunsTotal,
    PipelineRunStatusTotal,
    PipelineRunDurationSeconds,
    PipelineRetryEventsTotal,
    PipelineFreshnessLagSeconds,

    QueriesTotal,
    QueryErrorsTotal,
    QueryDurationSeconds,
    QueriesRunning,
}

impl Metric {
    /// Fully qualified series name, including the `databricks_` namespace.
    pub fn name(self) -> &'static str {
        match self {
            Metric::Up => "databricks_up",
            Metric::ScrapeStatus => "databricks_scrape_status",
            Metric::ScrapeDurationSeconds => "databricks_scrape_duration_seconds",
            Metric::BillingDbusTotal => "databricks_billing_dbus_total",
            Metric::BillingCostEstimateUsd => "databricks_billing_cost_estimate_usd",
            Metric::PriceChangeEvents => "databricks_price_change_events",
            Metric::BillingExportErrorsTotal => "databricks_billing_export_errors_total",
            Metric::JobRunsTotal => "databricks_job_runs_total",
            Metric::JobRunStatusTotal => "databricks_job_run_status_total",
            Metric::JobRunDurationSeconds => "databricks_job_run_duration_seconds",
            Metric::TaskRetriesTotal => "databricks_task_retries_total",
            Metric::JobSlaMissTotal => "databricks_job_sla_miss_total",
            Metric::PipelineRunsTotal => "databricks_pipeline_runs_total",
            Metric::PipelineRunStatusTotal => "databricks_pipeline_run_status_total",
            Metric::PipelineRunDurationSeconds => "databricks_pipeline_run_duration_seconds",
            Metric::PipelineRetryEventsTotal => "databricks_pipeline_retry_events_total",
            Metric::PipelineFreshnessLagSeconds => "databricks_pipeline_freshness_lag_seconds",
            Metric::QueriesTotal => "databricks_queries_total",
            Metric::QueryErrorsTotal => "databricks_query_errors_total",
            Metric::QueryDurationSeconds => "databricks_query_duration_seconds",
            Metric::QueriesRunning => "databricks_queries_running",
        }
    }

    pub fn help(self) -> &'static str {
        match self {
            Metric::Up => {
                "Whether the Databricks SQL warehouse could be reached (1) or not (0). Emitted before any query runs."
            }
            Metric::ScrapeStatus => "Whether the last scrape of a query stage succeeded (1) or failed (0).",
            Metric::ScrapeDurationSeconds => "Time spent collecting a metric domain during the last scrape.",
            Metric::BillingDbusTotal => "Total DBU consumption per workspace and SKU over the billing lookback.",
            Metric::BillingCostEstimateUsd => {
                "Estimated cost in USD per workspace and SKU (usage x list price) over the billing lookback."
            }
            Metric::PriceChangeEvents => "Number of list price changes per SKU over the billing lookback.",
            Metric::BillingExportErrorsTotal => "Billing query stages that failed during the last scrape.",
            Metric::JobRunsTotal => "Job runs per workspace and job over the jobs lookback.",
            Metric::JobRunStatusTotal => "Job runs per workspace, job and result state over the jobs lookback.",
            Metric::JobRunDurationSeconds => "Job run duration quantiles over the jobs lookback.",
            Metric::TaskRetriesTotal => "Task retries per workspace, job and task over the jobs lookback.",
            Metric::JobSlaMissTotal => "Job runs that exceeded the SLA threshold over the jobs lookback.",
            Metric::PipelineRunsTotal => "Pipeline updates per workspace and pipeline over the pipelines lookback.",
            Metric::PipelineRunStatusTotal => {
                "Pipeline updates per workspace, pipeline and result state over the pipelines lookback."
            }
            Metric::PipelineRunDurationSeconds => "Pipeline update duration quantiles over the pipelines lookback.",
            Metric::PipelineRetryEventsTotal => "Retry events within pipeline updates over the pipelines lookback.",
            Metric::PipelineFreshnessLagSeconds => "Average seconds since completed pipeline updates finished.",
            Metric::QueriesTotal => "SQL queries per workspace and warehouse over the queries lookback.",
            Metric::QueryErrorsTotal => "Failed SQL queries per workspace and warehouse over the queries lookback.",
            Metric::QueryDurationSeconds => "SQL query duration quantiles over the queries lookback.",
            Metric::QueriesRunning => "Estimated peak of concurrently running queries over the queries lookback.",
        }
    }

    /// Sliding-window counts can go down between scrapes, so only monotonic event counts are counters.
    pub fn kind(self) -> MetricKind {
        match self {
            Metric::PriceChangeEvents | Metric::BillingExportErrorsTotal => MetricKind::Counter,
            _ => MetricKind::Gauge,
        }
    }

    pub fn labels(self) -> &'static [&'static str] {
        match self {
            Metric::Up => &[],
            Metric::ScrapeStatus | Metric::BillingExportErrorsTotal => &[LABEL_STAGE],
            Metric::ScrapeDurationSeconds => &[LABEL_DOMAIN],
            Metric::BillingDbusTotal | Metric::BillingCostEstimateUsd => &[LABEL_WORKSPACE_ID, LABEL_SKU_NAME],
            Metric::PriceChangeEvents => &[LABEL_SKU_NAME],
            Metric::JobRunsTotal | Metric::JobSlaMissTotal => &[LABEL_WORKSPACE_ID, LABEL_JOB_ID, LABEL_JOB_NAME],
            Metric::JobRunStatusTotal => &[LABEL_WORKSPACE_ID, LABEL_JOB_ID, LABEL_JOB_NAME, LABEL_STATUS],
            Metric::JobRunDurationSeconds => &[LABEL_WORKSPACE_ID, LABEL_JOB_ID, LABEL_JOB_NAME, LABEL_QUANTILE],
            Metric::TaskRetriesTotal => &[LABEL_WORKSPACE_ID, LABEL_JOB_ID, LABEL_JOB_NAME, LABEL_TASK_KEY],
            Metric::PipelineRunsTotal | Metric::PipelineRetryEventsTotal | Metric::PipelineFreshnessLagSeconds => {
                &[LABEL_WORKSPACE_ID, LABEL_PIPELINE_ID, LABEL_PIPELINE_NAME]
            }
            Metric::PipelineRunStatusTotal => &[LABEL_WORKSPACE_ID, LABEL_PIPELINE_ID, LABEL_PIPELINE_NAME, LABEL_STATUS],
            Metric::PipelineRunDurationSeconds => {
                &[LABEL_WORKSPACE_ID, LABEL_PIPELINE_ID, LABEL_PIPELINE_NAME, LABEL_QUANTILE]
            }
            Metric::QueriesTotal | Metric::QueryErrorsTotal | Metric::QueriesRunning => {
                &[LABEL_WORKSPACE_ID, LABEL_WAREHOUSE_ID]
            }
            Metric::QueryDurationSeconds => &[LABEL_WORKSPACE_ID, LABEL_WAREHOUSE_ID, LABEL_QUANTILE],
        }
    }
}

/// One sample of one series. Label values are ordered like [`Metric::labels`].
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub metric: Metric,
    pub labels: Vec<String>,
    pub value: f64,
}

impl Observation {
    pub fn new<L, S>(metric: Metric, labels: L, value: f64) -> Self
    where
        L: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        debug_assert_eq!(
            labels.len(),
            metric.labels().len(),
            "label values do not match the schema of {}",
            metric.name()
        );
        Self { metric, labels, value }
    }
}

/// Receives observations from concurrently running collectors.
pub trait MetricSink: Send + Sync {
    fn emit(&self, observation: Observation);
}

/// A sink that keeps everything emitted during one scrape, in emission order.
#[derive(Debug, Default)]
pub struct ScrapeBuffer {
    observations: Mutex<Vec<Observation>>,
}

impl ScrapeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<Observation> {
        self.observations.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn into_observations(self) -> Vec<Observation> {
        self.observations.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MetricSink for ScrapeBuffer {
    fn emit(&self, observation: Observation) {
        self.observations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observation);
    }
}
