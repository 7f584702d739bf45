use super::{
    run_stages,
    Domain,
    DomainCollector,
    RowShape,
    ScrapeContext,
    Stage,
};
use crate::{
    metrics::{
        Metric,
        Observation,
    },
    queries,
};
use std::{
    future::Future,
    pin::Pin,
};

/// DBU consumption, cost estimates and list price changes from `system.billing`.
///
/// A failed stage is additionally counted in `databricks_billing_export_errors_total{stage}`.
#[derive(Debug, Default)]
pub struct BillingCollector;

impl BillingCollector {
    pub fn new() -> Self {
        Self
    }

    fn stages(ctx: &ScrapeContext) -> Vec<Stage> {
        let lookback = ctx.config.billing_lookback();
        vec![
            Stage::new("billing_dbus", queries::build_billing_dbus_query(lookback), RowShape::Value {
                metric: Metric::BillingDbusTotal,
                identity: 2,
            }),
            Stage::new("billing_cost", queries::build_billing_cost_estimate_query(lookback), RowShape::Value {
                metric: Metric::BillingCostEstimateUsd,
                identity: 2,
            }),
            Stage::new("price_changes", queries::build_price_change_events_query(lookback), RowShape::Value {
                metric: Metric::PriceChangeEvents,
                identity: 1,
            }),
        ]
    }
}

impl DomainCollector for BillingCollector {
    fn domain(&self) -> Domain {
        Domain::Billing
    }

    fn collect<'a>(&'a self, ctx: &'a ScrapeContext) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            run_stages(ctx, self.domain(), Self::stages(ctx), |stage, _| {
                ctx.emit(Observation::new(Metric::BillingExportErrorsTotal, [stage.name], 1.0));
            })
            .await;
        })
    }
}
