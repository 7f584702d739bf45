use super::{
    run_stages,
    Domain,
    DomainCollector,
    RowShape,
    ScrapeContext,
    Stage,
};
use crate::{
    availability::TableAvailabilityTracker,
    metrics::Metric,
    queries,
};
use std::{
    future::Future,
    pin::Pin,
};

pub const PIPELINE_TABLE: &str = "system.lakeflow.pipeline_update_timeline";

/// Pipeline update metrics from `system.lakeflow.pipeline_update_timeline`.
///
/// That table is not provisioned in every workspace. Collection is skipped while it is missing, and the
/// collector keeps its [`TableAvailabilityTracker`] across scrapes to re-probe it periodically.
#[derive(Debug)]
pub struct PipelinesCollector {
    tracker: TableAvailabilityTracker,
}

impl PipelinesCollector {
    pub fn new(table_check_interval: u32) -> Self {
        Self {
            tracker: TableAvailabilityTracker::new(
                PIPELINE_TABLE,
                queries::PIPELINE_TABLE_PROBE_QUERY,
                table_check_interval,
            ),
        }
    }

    pub fn tracker(&self) -> &TableAvailabilityTracker {
        &self.tracker
    }

    fn stages(ctx: &ScrapeContext) -> Vec<Stage> {
        let lookback = ctx.config.pipelines_lookback();
        vec![
            Stage::new("pipeline_runs", queries::build_pipeline_runs_query(lookback), RowShape::Value {
                metric: Metric::PipelineRunsTotal,
                identity: 3,
            }),
            Stage::new("pipeline_run_status", queries::build_pipeline_run_status_query(lookback), RowShape::Value {
                metric: Metric::PipelineRunStatusTotal,
                identity: 4,
            }),
            Stage::new(
                "pipeline_run_duration",
                queries::build_pipeline_run_duration_query(lookback),
                RowShape::Quantiles {
                    metric: Metric::PipelineRunDurationSeconds,
                    identity: 3,
                },
            ),
            Stage::new(
                "pipeline_retry_events",
                queries::build_pipeline_retry_events_query(lookback),
                RowShape::Value {
                    metric: Metric::PipelineRetryEventsTotal,
                    identity: 3,
                },
            ),
            Stage::new(
                "pipeline_freshness_lag",
                queries::build_pipeline_freshness_lag_query(lookback),
                RowShape::Value {
                    metric: Metric::PipelineFreshnessLagSeconds,
                    identity: 3,
                },
            ),
        ]
    }
}

impl DomainCollector for PipelinesCollector {
    fn domain(&self) -> Domain {
        Domain::Pipelines
    }

    fn collect<'a>(&'a self, ctx: &'a ScrapeContext) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            if self.tracker.should_recheck() {
                self.tracker.probe(ctx.warehouse.as_ref(), ctx.remaining()).await;
            }
            if !self.tracker.is_available_and_advance() {
                debug!(table = PIPELINE_TABLE, "Skipping pipeline metrics, table unavailable");
                return;
            }

            run_stages(ctx, self.domain(), Self::stages(ctx), |stage, e| {
                self.tracker.record_query_error(stage.name, e);
            })
            .await;
        })
    }
}
