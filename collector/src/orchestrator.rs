use crate::{
    collectors::{
        BillingCollector,
        DomainCollector,
        JobsCollector,
        PipelinesCollector,
        ScrapeContext,
        SqlWarehouseCollector,
    },
    connection::ConnectionManager,
    metrics::{
        Metric,
        MetricSink,
        Observation,
    },
    warehouse::Connector,
};
use databricks_exporter_config::Config;
use futures::future::join_all;
use std::sync::Arc;
use tokio::{
    sync::Mutex,
    time::Instant,
};

/// Entry point of a scrape: connects, reports liveness and fans out to every domain collector.
pub struct Orchestrator {
    config: Arc<Config>,
    connections: ConnectionManager,
    collectors: Vec<Arc<dyn DomainCollector>>,
    in_flight: Mutex<()>,
}

impl Orchestrator {
    /// Sets up the billing, jobs, pipelines and SQL warehouse collectors.
    pub fn new(config: Arc<Config>, connector: Arc<dyn Connector>) -> Self {
        let collectors: Vec<Arc<dyn DomainCollector>> = vec![
            Arc::new(BillingCollector::new()),
            Arc::new(JobsCollector::new()),
            Arc::new(PipelinesCollector::new(config.table_check_interval())),
            Arc::new(SqlWarehouseCollector::new()),
        ];
        Self::with_collectors(config, connector, collectors)
    }

    pub fn with_collectors(
        config: Arc<Config>,
        connector: Arc<dyn Connector>,
        collectors: Vec<Arc<dyn DomainCollector>>,
    ) -> Self {
        Self {
            config,
            connections: ConnectionManager::new(connector),
            collectors,
            in_flight: Mutex::new(()),
        }
    }

    /// Runs one scrape into `sink`. Concurrent calls queue up behind each other.
    ///
    /// `databricks_up` is always the first observation. When no session can be established it is the only one.
    #[instrument(level = "debug", skip_all)]
    pub async fn collect(&self, sink: Arc<dyn MetricSink>) {
        let _scrape = self.in_flight.lock().await;
        let started = Instant::now();

        let warehouse = match self.connections.get_healthy().await {
            Ok(warehouse) => warehouse,
            Err(e) => {
                error!(error = %e, "Failed to connect to Databricks");
                sink.emit(Observation::new(Metric::Up, Vec::<String>::new(), 0.0));
                return;
            }
        };
        sink.emit(Observation::new(Metric::Up, Vec::<String>::new(), 1.0));
        debug!("Connection healthy, emitted up=1");

        let deadline = Instant::now() + self.config.query_timeout();
        let ctx = Arc::new(ScrapeContext::new(warehouse, Arc::clone(&self.config), sink, deadline));

        let tasks = self.collectors.iter().map(|collector| {
            let collector = Arc::clone(collector);
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { collector.collect(&ctx).await })
        });

        for (result, collector) in join_all(tasks).await.into_iter().zip(&self.collectors) {
            if let Err(e) = result {
                error!(domain = %collector.domain(), error = %e, "Collector task failed");
            }
        }

        debug!(duration_seconds = started.elapsed().as_secs_f64(), "Finished collecting metrics");
    }
}
