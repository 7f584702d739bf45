use super::{
    run_stages,
    Domain,
    DomainCollector,
    RowShape,
    ScrapeContext,
    Stage,
};
use crate::{
    metrics::Metric,
    queries,
};
use std::{
    future::Future,
    pin::Pin,
};

/// Query volume, errors, latency and concurrency per SQL warehouse from `system.query.history`.
#[derive(Debug, Default)]
pub struct SqlWarehouseCollector;

impl SqlWarehouseCollector {
    pub fn new() -> Self {
        Self
    }

    fn stages(ctx: &ScrapeContext) -> Vec<Stage> {
        let lookback = ctx.config.queries_lookback();
        vec![
            Stage::new("queries", queries::build_queries_query(lookback), RowShape::Value {
                metric: Metric::QueriesTotal,
                identity: 2,
            }),
            Stage::new("query_errors", queries::build_query_errors_query(lookback), RowShape::Value {
                metric: Metric::QueryErrorsTotal,
                identity: 2,
            }),
            Stage::new("query_duration", queries::build_query_duration_query(lookback), RowShape::Quantiles {
                metric: Metric::QueryDurationSeconds,
                identity: 2,
            }),
            Stage::new("queries_running", queries::build_queries_running_query(lookback), RowShape::Value {
                metric: Metric::QueriesRunning,
                identity: 2,
            }),
        ]
    }
}

impl DomainCollector for SqlWarehouseCollector {
    fn domain(&self) -> Domain {
        Domain::SqlWarehouse
    }

    fn collect<'a>(&'a self, ctx: &'a ScrapeContext) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(run_stages(ctx, self.domain(), Self::stages(ctx), |_, _| {}))
    }
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
    use databricks_exporter_config::Config;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[tokio::test]
    async fn warehouse_metrics() {
        let connector = FakeConnector::default();
        let warehouse = connector.warehouse();
        warehouse.respond("AS query_count", vec![
            vec![Some("1001"), Some("wh-1"), Some("250")],
            vec![Some("1001"), Some("unknown"), Some("3")],
        ]);
        warehouse.respond("AS error_count", vec![vec![Some("1001"), Some("wh-1"), Some("4")]]);
        warehouse.respond("AS p99", vec![vec![Some("1001"), Some("wh-1"), Some("0.8"), Some("4.2"), Some("12.9")]]);
        warehouse.respond("AS max_concurrent", vec![vec![Some("1001"), Some("wh-1"), Some("6")]]);

        let sink = Arc::new(ScrapeBuffer::new());
        SqlWarehouseCollector::new()
            .collect(&context(&connector, Config::default(), sink.clone()))
            .await;
        let observations = sink.snapshot();

        assert_eq!(series(&observations, Metric::QueriesTotal), vec![
            (labels(&["1001", "wh-1"]), 250.0),
            (labels(&["1001", "unknown"]), 3.0),
        ]);
        assert_eq!(series(&observations, Metric::QueryErrorsTotal), vec![(labels(&["1001", "wh-1"]), 4.0)]);
        assert_eq!(series(&observations, Metric::QueryDurationSeconds), vec![
            (labels(&["1001", "wh-1", "0.50"]), 0.8),
            (labels(&["1001", "wh-1", "0.95"]), 4.2),
            (labels(&["1001", "wh-1", "0.99"]), 12.9),
        ]);
        assert_eq!(series(&observations, Metric::QueriesRunning), vec![(labels(&["1001", "wh-1"]), 6.0)]);
        assert!(connector.warehouse().executed().iter().all(|sql| sql.contains("INTERVAL 1 HOUR")));
    }
}
