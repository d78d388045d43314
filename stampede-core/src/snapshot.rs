use std::collections::BTreeMap;
use std::time::Duration;

use stampede_metrics::{HistogramSnapshot, HistogramSummary, per_sec};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckCounts {
    pub passes: u64,
    pub fails: u64,
}

impl CheckCounts {
    pub fn total(&self) -> u64 {
        self.passes.saturating_add(self.fails)
    }

    pub fn pass_rate(&self) -> Option<f64> {
        let total = self.total();
        (total > 0).then(|| self.passes as f64 / total as f64)
    }
}

/// Immutable point-in-time view of the run's metrics. Durations are in milliseconds.
#[derive(Debug, Clone)]
pub struct AggregateSnapshot {
    pub elapsed: Duration,
    pub total_requests: u64,
    /// Requests counted as failed by `http_req_failed` (errors or unexpected status).
    pub failed_requests: u64,
    /// Requests that ended in a transport error or timeout.
    pub error_count: u64,
    pub errors_by_kind: BTreeMap<String, u64>,
    pub status_counts: BTreeMap<u16, u64>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub iterations: u64,
    pub interrupted_iterations: u64,
    pub checks: BTreeMap<String, CheckCounts>,
    pub vus: u64,
    pub vus_max: u64,
    pub latency: HistogramSnapshot,
    pub iteration_duration: HistogramSnapshot,
}

impl AggregateSnapshot {
    /// Latency percentile in milliseconds, `q` in `[0, 100]`.
    pub fn percentile(&self, q: f64) -> Option<f64> {
        self.latency.percentile(q)
    }

    pub fn latency_summary(&self) -> HistogramSummary {
        self.latency.summary()
    }

    pub fn failure_rate(&self) -> Option<f64> {
        (self.total_requests > 0).then(|| self.failed_requests as f64 / self.total_requests as f64)
    }

    pub fn checks_total(&self) -> CheckCounts {
        self.checks
            .values()
            .fold(CheckCounts::default(), |acc, c| CheckCounts {
                passes: acc.passes + c.passes,
                fails: acc.fails + c.fails,
            })
    }

    /// Pass rate over all check evaluations.
    pub fn checks_rate(&self) -> Option<f64> {
        self.checks_total().pass_rate()
    }

    pub fn check(&self, name: &str) -> Option<CheckCounts> {
        self.checks.get(name).copied()
    }

    pub fn status_count(&self, status: u16) -> u64 {
        self.status_counts.get(&status).copied().unwrap_or(0)
    }

    pub fn requests_per_sec(&self) -> f64 {
        per_sec(self.total_requests, self.elapsed.as_secs_f64())
    }
}
