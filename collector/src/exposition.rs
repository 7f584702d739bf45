use crate::metrics::{
    Metric,
    MetricKind,
    Observation,
};
use prometheus::{
    CounterVec,
    Encoder as _,
    GaugeVec,
    Opts,
    Registry,
    TextEncoder,
};
use std::collections::{
    btree_map::Entry,
    BTreeMap,
};

/// Content type of the text exposition format written by [`render_text`].
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

enum Family {
    Gauge(GaugeVec),
    Counter(CounterVec),
}

impl Family {
    fn register(metric: Metric, registry: &Registry) -> prometheus::Result<Self> {
        let opts = Opts::new(metric.name(), metric.help());
        let family = match metric.kind() {
            MetricKind::Gauge => {
                let vec = GaugeVec::new(opts, metric.labels())?;
                registry.register(Box::new(vec.clone()))?;
                Family::Gauge(vec)
            }
            MetricKind::Counter => {
                let vec = CounterVec::new(opts, metric.labels())?;
                registry.register(Box::new(vec.clone()))?;
                Family::Counter(vec)
            }
        };
        Ok(family)
    }

    fn apply(&self, observation: &Observation) -> prometheus::Result<()> {
        let labels: Vec<&str> = observation.labels.iter().map(String::as_str).collect();
        match self {
            Family::Gauge(vec) => vec.get_metric_with_label_values(&labels)?.set(observation.value),
            Family::Counter(vec) => {
                if observation.value < 0.0 || observation.value.is_nan() {
                    warn!(
                        metric = observation.metric.name(),
                        value = observation.value,
                        "Dropping invalid counter value"
                    );
                    return Ok(());
                }
                vec.get_metric_with_label_values(&labels)?.inc_by(observation.value);
            }
        }
        Ok(())
    }
}

/// Renders one scrape's observations in the Prometheus text format.
///
/// A fresh registry is built every time, so series that were not observed in this scrape disappear from the
/// output. Repeated gauge samples for the same label set keep the last value; counter samples add up.
pub fn render_text(observations: &[Observation]) -> prometheus::Result<String> {
    let registry = Registry::new();
    let mut families = BTreeMap::<Metric, Family>::new();

    for observation in observations {
        let family = match families.entry(observation.metric) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(Family::register(observation.metric, &registry)?),
        };
        if let Err(e) = family.apply(observation) {
            warn!(metric = observation.metric.name(), error = %e, "Dropping malformed observation");
        }
    }

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
