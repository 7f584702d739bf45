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

/// Job run counts, result states, durations, task retries and SLA misses from `system.lakeflow`.
#[derive(Debug, Default)]
pub struct JobsCollector;

impl JobsCollector {
    pub fn new() -> Self {
        Self
    }

    fn stages(ctx: &ScrapeContext) -> Vec<Stage> {
        let lookback = ctx.config.jobs_lookback();
        let mut stages = vec![
            Stage::new("job_runs", queries::build_job_runs_query(lookback), RowShape::Value {
                metric: Metric::JobRunsTotal,
                identity: 3,
            }),
            Stage::new("job_run_status", queries::build_job_run_status_query(lookback), RowShape::Value {
                metric: Metric::JobRunStatusTotal,
                identity: 4,
            }),
            Stage::new("job_run_duration", queries::build_job_run_duration_query(lookback), RowShape::Quantiles {
                metric: Metric::JobRunDurationSeconds,
                identity: 3,
            }),
        ];
        // task_key makes this one high cardinality, so it is opt-in.
        if ctx.config.collect_task_retries {
            stages.push(Stage::new("task_retries", queries::build_task_retries_query(lookback), RowShape::Value {
                metric: Metric::TaskRetriesTotal,
                identity: 4,
            }));
        }
        stages.push(Stage::new(
            "job_sla_miss",
            queries::build_job_sla_miss_query(lookback, ctx.config.sla_threshold_seconds()),
            RowShape::Value {
                metric: Metric::JobSlaMissTotal,
                identity: 3,
            },
        ));
        stages
    }
}

impl DomainCollector for JobsCollector {
    fn domain(&self) -> Domain {
        Domain::Jobs
    }

    fn collect<'a>(&'a self, ctx: &'a ScrapeContext) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(run_stages(ctx, self.domain(), Self::stages(ctx), |_, _| {}))
    }
}
