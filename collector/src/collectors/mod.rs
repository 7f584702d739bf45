//! # Domain collectors
//!
//! One collector per group of system tables. Each runs its query stages one after another against the shared
//! session and streams observations into the sink. A failing stage is logged, reported through
//! `databricks_scrape_status{stage}` and skipped; it never stops its siblings, and nothing is returned to the
//! orchestrator.
//!
//! - **`BillingCollector`**: DBUs, cost estimates and list price changes
//! - **`JobsCollector`**: job runs, result states, durations, task retries and SLA misses
//! - **`PipelinesCollector`**: pipeline updates, gated on the optional pipelines table
//! - **`SqlWarehouseCollector`**: query counts, errors, latency and concurrency

pub mod billing;
pub mod jobs;
pub mod pipelines;
pub mod sql_warehouse;

pub use billing::BillingCollector;
pub use jobs::JobsCollector;
pub use pipelines::PipelinesCollector;
pub use sql_warehouse::SqlWarehouseCollector;

use crate::{
    metrics::{
        Metric,
        MetricSink,
        Observation,
        QUANTILES,
    },
    warehouse::{
        ResultSet,
        Row,
        Warehouse,
        WarehouseError,
    },
};
use databricks_exporter_config::Config;
use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    time::Duration,
};
use tokio::time::Instant;

/// Time a session gets past the scrape deadline to cancel its in-flight statement.
const DEADLINE_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Domain {
    Billing,
    Jobs,
    Pipelines,
    SqlWarehouse,
}

/// Everything a collector needs for one scrape.
pub struct ScrapeContext {
    pub warehouse: Arc<dyn Warehouse>,
    pub config: Arc<Config>,
    pub sink: Arc<dyn MetricSink>,
    /// Shared by every query of the scrape.
    pub deadline: Instant,
}

impl ScrapeContext {
    pub fn new(
        warehouse: Arc<dyn Warehouse>,
        config: Arc<Config>,
        sink: Arc<dyn MetricSink>,
        deadline: Instant,
    ) -> Self {
        Self {
            warehouse,
            config,
            sink,
            deadline,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Runs `sql` within what is left of the scrape deadline.
    ///
    /// The session enforces the deadline itself so it can cancel the statement server side. The outer timeout only
    /// catches a session that overruns its cancellation.
    pub async fn query(&self, sql: &str) -> Result<ResultSet, WarehouseError> {
        let remaining = self.remaining();
        if remaining.is_zero() {
            return Err(self.timed_out());
        }
        let result = tokio::time::timeout_at(self.deadline + DEADLINE_GRACE, self.warehouse.query(sql, remaining))
            .await
            .map_err(|_| self.timed_out())?;
        match result {
            Err(WarehouseError::Timeout(_)) => Err(self.timed_out()),
            other => other,
        }
    }

    fn timed_out(&self) -> WarehouseError {
        WarehouseError::Timeout(self.config.query_timeout())
    }

    pub fn emit(&self, observation: Observation) {
        self.sink.emit(observation);
    }
}

/// Collects one metric domain. Failures are handled inside; the future always completes.
pub trait DomainCollector: Send + Sync {
    fn domain(&self) -> Domain;

    fn collect<'a>(&'a self, ctx: &'a ScrapeContext) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// How the columns of a stage's result rows map onto observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowShape {
    /// `identity` label columns followed by one value column.
    Value { metric: Metric, identity: usize },
    /// `identity` label columns followed by the p50, p95 and p99 columns, one observation per quantile.
    Quantiles { metric: Metric, identity: usize },
}

impl RowShape {
    /// Decodes one row. `Ok(None)` means an identity column was `NULL` and the row is skipped.
    /// A `NULL` value only skips that one observation.
    pub fn decode(&self, row: &Row) -> Result<Option<Vec<Observation>>, WarehouseError> {
        let (metric, identity) = match *self {
            RowShape::Value { metric, identity } | RowShape::Quantiles { metric, identity } => (metric, identity),
        };

        let mut labels = Vec::with_capacity(identity + 1);
        for index in 0..identity {
            match row.text(index) {
                Some(value) => labels.push(value.to_string()),
                None => return Ok(None),
            }
        }

        let mut observations = Vec::new();
        match self {
            RowShape::Value { .. } => {
                if let Some(value) = row.float(identity)? {
                    observations.push(Observation::new(metric, labels, value));
                }
            }
            RowShape::Quantiles { .. } => {
                for (offset, quantile) in QUANTILES.iter().enumerate() {
                    if let Some(value) = row.float(identity + offset)? {
                        let mut labels = labels.clone();
                        labels.push(quantile.to_string());
                        observations.push(Observation::new(metric, labels, value));
                    }
                }
            }
        }
        Ok(Some(observations))
    }
}

/// One query of a domain and the decoder for its rows.
#[derive(Debug, Clone)]
pub struct Stage {
    pub name: &'static str,
    pub sql: String,
    pub shape: RowShape,
}

impl Stage {
    pub fn new(name: &'static str, sql: String, shape: RowShape) -> Self {
        Self { name, sql, shape }
    }

    /// Queries and emits this stage. Returns how many observations were emitted.
    async fn run(&self, ctx: &ScrapeContext) -> Result<usize, WarehouseError> {
        debug!(stage = self.name, "Querying");
        let result = ctx.query(&self.sql).await?;

        let mut emitted = 0;
        for row in &result.rows {
            match self.shape.decode(row) {
                Ok(Some(observations)) => {
                    emitted += observations.len();
                    observations.into_iter().for_each(|observation| ctx.emit(observation));
                }
                Ok(None) => debug!(stage = self.name, "Skipping row with NULL identity column"),
                Err(e) => warn!(stage = self.name, error = %e, "Skipping row that failed to decode"),
            }
        }
        debug!(stage = self.name, rows = result.rows.len(), emitted, "Collected");
        Ok(emitted)
    }
}

/// Runs `stages` in order, isolating failures, then records how long the domain took.
///
/// Every stage reports `scrape_status`. `on_error` sees each failed stage after it has been logged.
pub(crate) async fn run_stages<F>(ctx: &ScrapeContext, domain: Domain, stages: Vec<Stage>, mut on_error: F)
where
    F: FnMut(&Stage, &WarehouseError) + Send,
{
    let started = Instant::now();
    debug!(%domain, "Collecting");

    for stage in &stages {
        let status = match stage.run(ctx).await {
            Ok(_) => 1.0,
            Err(e) => {
                if e.is_table_not_found() {
                    debug!(%domain, stage = stage.name, error = %e, "Stage hit a missing table");
                } else {
                    error!(%domain, stage = stage.name, error = %e, "Failed to collect stage");
                }
                on_error(stage, &e);
                0.0
            }
        };
        ctx.emit(Observation::new(Metric::ScrapeStatus, [stage.name], status));
    }

    let elapsed = started.elapsed().as_secs_f64();
    let domain_name: &'static str = domain.into();
    ctx.emit(Observation::new(Metric::ScrapeDurationSeconds, [domain_name], elapsed));
    debug!(%domain, duration_seconds = elapsed, "Finished collecting");
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        metrics::ScrapeBuffer,
        testing::{
            context,
            labels,
            series,
            FakeConnector,
        },
    };
    use pretty_assertions::assert_eq;

    #[test]
    fn value_rows() {
        let shape = RowShape::Value {
            metric: Metric::JobRunStatusTotal,
            identity: 4,
        };
        let row: Row = [Some("1"), Some("2"), Some("nightly"), Some("FAILED"), Some("3")].into_iter().collect();
        let observations = shape.decode(&row).unwrap().unwrap();
        assert_eq!(observations, vec![Observation::new(
            Metric::JobRunStatusTotal,
            ["1", "2", "nightly", "FAILED"],
            3.0
        )]);

        let null_identity: Row = [None, Some("2"), Some("nightly"), Some("FAILED"), Some("3")].into_iter().collect();
        assert_eq!(shape.decode(&null_identity).unwrap(), None);

        let null_value: Row = [Some("1"), Some("2"), Some("nightly"), Some("FAILED"), None].into_iter().collect();
        assert_eq!(shape.decode(&null_value).unwrap(), Some(vec![]));

        let garbage: Row = [Some("1"), Some("2"), Some("nightly"), Some("FAILED"), Some("x")].into_iter().collect();
        assert!(shape.decode(&garbage).is_err());
    }

    #[test]
    fn quantile_rows_skip_null_values_only() {
        let shape = RowShape::Quantiles {
            metric: Metric::QueryDurationSeconds,
            identity: 2,
        };
        let row: Row = [Some("1"), Some("wh"), Some("0.4"), None, Some("9.5")].into_iter().collect();
        let observations = shape.decode(&row).unwrap().unwrap();
        assert_eq!(observations, vec![
            Observation::new(Metric::QueryDurationSeconds, ["1", "wh", "0.50"], 0.4),
            Observation::new(Metric::QueryDurationSeconds, ["1", "wh", "0.99"], 9.5),
        ]);
    }

    #[tokio::test]
    async fn failing_stage_does_not_stop_siblings() {
        let connector = FakeConnector::default();
        connector.warehouse().fail("-- first", "[INTERNAL_ERROR] boom");
        connector.warehouse().respond("-- second", vec![vec![Some("1"), Some("wh"), Some("10")]]);
        connector.warehouse().respond("-- third", vec![
            vec![Some("1"), Some("wh"), Some("2")],
            vec![None, Some("wh"), Some("7")],
            vec![Some("1"), Some("other"), Some("not a number")],
        ]);
        let sink = Arc::new(ScrapeBuffer::new());
        let ctx = context(&connector, Config::default(), sink.clone());

        let shape = |metric| RowShape::Value { metric, identity: 2 };
        let stages = vec![
            Stage::new("first", "SELECT 1 -- first".to_string(), shape(Metric::QueriesTotal)),
            Stage::new("second", "SELECT 2 -- second".to_string(), shape(Metric::QueryErrorsTotal)),
            Stage::new("third", "SELECT 3 -- third".to_string(), shape(Metric::QueriesRunning)),
        ];
        let mut failed = Vec::new();
        run_stages(&ctx, Domain::SqlWarehouse, stages, |stage, _| failed.push(stage.name)).await;

        let observations = sink.snapshot();
        assert_eq!(failed, vec!["first"]);
        assert_eq!(series(&observations, Metric::QueriesTotal), vec![]);
        assert_eq!(series(&observations, Metric::QueryErrorsTotal), vec![(labels(&["1", "wh"]), 10.0)]);
        assert_eq!(series(&observations, Metric::QueriesRunning), vec![(labels(&["1", "wh"]), 2.0)]);
        assert_eq!(series(&observations, Metric::ScrapeStatus), vec![
            (labels(&["first"]), 0.0),
            (labels(&["second"]), 1.0),
            (labels(&["third"]), 1.0),
        ]);
        let durations = series(&observations, Metric::ScrapeDurationSeconds);
        assert_eq!(durations.len(), 1);
        assert_eq!(durations[0].0, labels(&["sql_warehouse"]));
    }

    #[tokio::test]
    async fn expired_deadline_fails_stage_without_querying() {
        let connector = FakeConnector::default();
        let sink = Arc::new(ScrapeBuffer::new());
        let ctx = ScrapeContext::new(connector.session(), Arc::new(Config::default()), sink, Instant::now());

        let err = ctx.query("SELECT 1").await.err().unwrap();
        assert_eq!(err.to_string(), "query did not finish within 300s");
        assert!(connector.warehouse().executed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn session_cancels_past_deadline_and_reports_configured_timeout() {
        let connector = FakeConnector::default();
        connector.warehouse().slow("SELECT", Duration::from_secs(60));
        connector.warehouse().cancel_takes(Duration::from_secs(3));
        let config = Config {
            query_timeout: Duration::from_secs(120),
            ..Config::default()
        };
        let sink = Arc::new(ScrapeBuffer::new());
        let started = Instant::now();
        let ctx = ScrapeContext::new(connector.session(), Arc::new(config), sink, started + Duration::from_secs(2));

        let err = ctx.query("SELECT 1").await.err().unwrap();

        // The session got to cancel its statement instead of being dropped at the deadline.
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        assert_eq!(connector.warehouse().cancels(), 1);
        assert_eq!(err.to_string(), "query did not finish within 120s");
    }
}
