use std::time::Duration;

use stampede_metrics::{HistogramSnapshot, per_sec};

use crate::iteration_metrics::{
    INTERRUPTED_ITERATIONS, ITERATION_DURATION, ITERATIONS, VUS, VUS_MAX,
};
use crate::request_metrics::{
    CHECKS, DATA_RECEIVED, DATA_SENT, HTTP_REQ_DURATION, HTTP_REQ_ERRORS, HTTP_REQ_FAILED,
    HTTP_REQS,
};
use crate::snapshot::AggregateSnapshot;
use crate::thresholds::{MetricSelector, ThresholdAgg, ThresholdSpec};

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdFailure {
    pub metric: String,
    pub expression: String,
    /// `None` when the metric had no data for the aggregation.
    pub observed: Option<f64>,
    pub abort_on_fail: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunVerdict {
    pub passed: bool,
    pub failed_thresholds: Vec<ThresholdFailure>,
}

/// Snapshot view of one metric, as thresholds see it.
enum Observed<'a> {
    Counter { total: u64, elapsed: Duration },
    Rate(Option<f64>),
    Gauge { value: u64, max: u64 },
    Histogram(&'a HistogramSnapshot),
}

fn select<'a>(snapshot: &'a AggregateSnapshot, selector: &MetricSelector) -> Option<Observed<'a>> {
    let counter = |total| Observed::Counter {
        total,
        elapsed: snapshot.elapsed,
    };

    let observed = match selector {
        MetricSelector::Check(name) => {
            Observed::Rate(snapshot.check(name).and_then(|c| c.pass_rate()))
        }
        MetricSelector::Status(status) => counter(snapshot.status_count(*status)),
        MetricSelector::Metric(name) => match name.as_str() {
            HTTP_REQS => counter(snapshot.total_requests),
            HTTP_REQ_FAILED => Observed::Rate(snapshot.failure_rate()),
            HTTP_REQ_ERRORS => counter(snapshot.error_count),
            HTTP_REQ_DURATION => Observed::Histogram(&snapshot.latency),
            DATA_SENT => counter(snapshot.bytes_sent),
            DATA_RECEIVED => counter(snapshot.bytes_received),
            CHECKS => Observed::Rate(snapshot.checks_rate()),
            ITERATIONS => counter(snapshot.iterations),
            INTERRUPTED_ITERATIONS => counter(snapshot.interrupted_iterations),
            ITERATION_DURATION => Observed::Histogram(&snapshot.iteration_duration),
            VUS => Observed::Gauge {
                value: snapshot.vus,
                max: snapshot.vus_max,
            },
            VUS_MAX => Observed::Gauge {
                value: snapshot.vus_max,
                max: snapshot.vus_max,
            },
            _ => return None,
        },
    };
    Some(observed)
}

fn observed_value(observed: &Observed<'_>, agg: ThresholdAgg) -> Option<f64> {
    match (observed, agg) {
        (Observed::Counter { total, .. }, ThresholdAgg::Count) => Some(*total as f64),
        // A counter's rate is its per-second throughput.
        (Observed::Counter { total, elapsed }, ThresholdAgg::Rate) => {
            (!elapsed.is_zero()).then(|| per_sec(*total, elapsed.as_secs_f64()))
        }

        (Observed::Rate(rate), ThresholdAgg::Rate) => *rate,

        (Observed::Gauge { value, .. }, ThresholdAgg::Value) => Some(*value as f64),
        (Observed::Gauge { max, .. }, ThresholdAgg::Max) => Some(*max as f64),

        (Observed::Histogram(h), ThresholdAgg::Count) => Some(h.count() as f64),
        (Observed::Histogram(h), ThresholdAgg::Avg) => h.mean(),
        (Observed::Histogram(h), ThresholdAgg::Min) => h.min(),
        (Observed::Histogram(h), ThresholdAgg::Max) => h.max(),
        (Observed::Histogram(h), ThresholdAgg::Med) => h.percentile(50.0),
        (Observed::Histogram(h), ThresholdAgg::P(p)) => h.percentile(p),

        _ => None,
    }
}

/// Observed value of `spec` in `snapshot`, or `None` if there is no data.
pub fn observe(snapshot: &AggregateSnapshot, spec: &ThresholdSpec) -> Option<f64> {
    let observed = select(snapshot, &spec.selector)?;
    observed_value(&observed, spec.expr.agg)
}

/// Evaluates every threshold. A threshold with no data fails with `observed = None`.
pub fn evaluate_thresholds(snapshot: &AggregateSnapshot, specs: &[ThresholdSpec]) -> RunVerdict {
    let failed_thresholds: Vec<ThresholdFailure> = specs
        .iter()
        .filter_map(|spec| {
            let observed = observe(snapshot, spec);
            let passed = observed.is_some_and(|v| spec.expr.op.compare(v, spec.expr.value));
            (!passed).then(|| ThresholdFailure {
                metric: spec.metric.clone(),
                expression: spec.expression.clone(),
                observed,
                abort_on_fail: spec.abort_on_fail,
            })
        })
        .collect();

    RunVerdict {
        passed: failed_thresholds.is_empty(),
        failed_thresholds,
    }
}

/// First `abort_on_fail` threshold that fails once its delay has passed.
pub fn abort_failure(
    snapshot: &AggregateSnapshot,
    specs: &[ThresholdSpec],
) -> Option<ThresholdFailure> {
    let eligible: Vec<ThresholdSpec> = specs
        .iter()
        .filter(|s| {
            s.abort_on_fail && snapshot.elapsed >= s.delay_abort_eval.unwrap_or(Duration::ZERO)
        })
        .cloned()
        .collect();
    if eligible.is_empty() {
        return None;
    }
    evaluate_thresholds(snapshot, &eligible)
        .failed_thresholds
        .into_iter()
        .next()
}
