use std::sync::Arc;
use std::time::Duration;

use stampede_metrics::CounterSnapshot;

use crate::aggregator::MetricsAggregator;
use crate::schedule::{RampingSchedule, StageSnapshot};

#[derive(Debug, Clone)]
pub struct LiveMetrics {
    pub requests_total: u64,
    pub failed_requests_total: u64,
    pub iterations_total: u64,
    /// Requests/sec observed during the last progress interval.
    pub rps_now: f64,
    /// Latency percentiles over the whole run so far, in milliseconds.
    pub latency_p50_ms: Option<f64>,
    pub latency_p95_ms: Option<f64>,
    /// Check pass rate over the whole run so far.
    pub checks_rate: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Monotonic tick counter (1-based).
    pub tick: u64,
    pub elapsed: Duration,
    pub total_duration: Duration,
    pub scenario: String,
    pub stage: Option<StageSnapshot>,
    pub active_vus: u64,
    pub metrics: LiveMetrics,
}

pub type ProgressFn = Arc<dyn Fn(ProgressUpdate) + Send + Sync + 'static>;

/// Builds successive progress updates, keeping the previous counter reading for rates.
#[derive(Debug)]
pub(crate) struct ProgressTracker {
    scenario: String,
    tick: u64,
    prev_requests: Option<CounterSnapshot>,
    prev_elapsed: Duration,
}

impl ProgressTracker {
    pub(crate) fn new(scenario: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            tick: 0,
            prev_requests: None,
            prev_elapsed: Duration::ZERO,
        }
    }

    pub(crate) fn next(
        &mut self,
        schedule: &RampingSchedule,
        aggregator: &MetricsAggregator,
    ) -> ProgressUpdate {
        let snapshot = aggregator.snapshot();
        let elapsed = snapshot.elapsed;

        let requests = CounterSnapshot::new(snapshot.total_requests);
        let dt = elapsed.saturating_sub(self.prev_elapsed).as_secs_f64();
        let rps_now = requests.per_sec_since(self.prev_requests, dt);
        self.prev_requests = Some(requests);
        self.prev_elapsed = elapsed;
        self.tick += 1;

        ProgressUpdate {
            tick: self.tick,
            elapsed,
            total_duration: schedule.total_duration(),
            scenario: self.scenario.clone(),
            stage: schedule.stage_snapshot_at(elapsed),
            active_vus: snapshot.vus,
            metrics: LiveMetrics {
                requests_total: snapshot.total_requests,
                failed_requests_total: snapshot.failed_requests,
                iterations_total: snapshot.iterations,
                rps_now,
                latency_p50_ms: snapshot.percentile(50.0),
                latency_p95_ms: snapshot.percentile(95.0),
                checks_rate: snapshot.checks_rate(),
            },
        }
    }
}
