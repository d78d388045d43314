use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

use stampede_metrics::{KeyId, MetricId, MetricKind, Registry, TagSet};

use crate::Result;
use crate::checks::CheckResult;
use crate::executor::RequestOutcome;
use crate::iteration_metrics::{IterationHandles, IterationMetricIds};
use crate::request_metrics::{
    RequestHandles, RequestMetricIds, TAG_CHECK, TAG_ERROR_KIND, TAG_STATUS, record_request,
};
use crate::scenario::ExpectedStatuses;
use crate::snapshot::{AggregateSnapshot, CheckCounts};

/// Histograms record microseconds; snapshots report milliseconds.
const US_PER_MS: f64 = 1000.0;

/// Owns every run metric. All `record*` methods take `&self` and are safe to call from any
/// number of tasks at once.
#[derive(Debug)]
pub struct MetricsAggregator {
    registry: Registry,
    requests: RequestMetricIds,
    iterations: IterationMetricIds,
    request_handles: RequestHandles,
    iteration_handles: IterationHandles,
    expected: ExpectedStatuses,
    started: Instant,
}

impl MetricsAggregator {
    pub fn new(expected: ExpectedStatuses) -> Result<Self> {
        let registry = Registry::default();
        let requests = RequestMetricIds::register(&registry)?;
        let iterations = IterationMetricIds::register(&registry)?;
        let request_handles = RequestHandles::new(&registry, &requests);
        let iteration_handles = IterationHandles::new(&registry, &iterations);

        Ok(Self {
            registry,
            requests,
            iterations,
            request_handles,
            iteration_handles,
            expected,
            started: Instant::now(),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Kind of a built-in metric, `None` for unknown names.
    pub fn metric_kind(&self, name: &str) -> Option<MetricKind> {
        self.registry.lookup(name).map(|(_, kind)| kind)
    }

    /// Restarts the clock used for `elapsed` (and per-second rates).
    pub fn restart_clock(&mut self) {
        self.started = Instant::now();
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn record(&self, outcome: &RequestOutcome, checks: &[CheckResult]) {
        record_request(
            &self.registry,
            &self.requests,
            &self.request_handles,
            &self.expected,
            outcome,
            checks,
        );
    }

    pub fn record_iteration(&self, duration: Duration) {
        self.iteration_handles.record_iteration(duration);
    }

    pub fn record_interrupted(&self, n: u64) {
        self.iteration_handles.record_interrupted(n);
    }

    pub fn set_vus(&self, active: u64) {
        self.iteration_handles.set_vus(active);
    }

    pub fn total_requests(&self) -> u64 {
        self.registry.query(self.requests.requests).sum_counter_total()
    }

    pub fn snapshot(&self) -> AggregateSnapshot {
        let reg = &self.registry;
        let status_key = reg.resolve_key(TAG_STATUS);
        let kind_key = reg.resolve_key(TAG_ERROR_KIND);
        let check_key = reg.resolve_key(TAG_CHECK);

        let status_counts: BTreeMap<u16, u64> = self
            .grouped_counter(self.requests.requests, status_key)
            .filter_map(|(status, n)| status.parse().ok().map(|s| (s, n)))
            .collect();
        let errors_by_kind: BTreeMap<String, u64> = self
            .grouped_counter(self.requests.errors, kind_key)
            .collect();

        let checks: BTreeMap<String, CheckCounts> = reg
            .query(self.requests.checks)
            .group_by([check_key])
            .sum_rate()
            .into_iter()
            .filter_map(|(tags, (total, hits))| {
                let name = self.tag_value(&tags, check_key)?;
                Some((
                    name,
                    CheckCounts {
                        passes: hits,
                        fails: total.saturating_sub(hits),
                    },
                ))
            })
            .collect();

        let (_, failed_requests) = reg.query(self.requests.failed).sum_rate_total();
        let gauge = |id: MetricId| {
            let v = reg.query(id).max_gauge().unwrap_or(0);
            u64::try_from(v).unwrap_or(0)
        };

        AggregateSnapshot {
            elapsed: self.elapsed(),
            total_requests: reg.query(self.requests.requests).sum_counter_total(),
            failed_requests,
            error_count: errors_by_kind.values().sum(),
            errors_by_kind,
            status_counts,
            bytes_sent: reg.query(self.requests.data_sent).sum_counter_total(),
            bytes_received: reg.query(self.requests.data_received).sum_counter_total(),
            iterations: reg.query(self.iterations.iterations).sum_counter_total(),
            interrupted_iterations: reg.query(self.iterations.interrupted).sum_counter_total(),
            checks,
            vus: gauge(self.iterations.vus),
            vus_max: gauge(self.iterations.vus_max),
            latency: reg
                .query(self.requests.duration_us)
                .histogram_snapshot(US_PER_MS),
            iteration_duration: reg
                .query(self.iterations.duration_us)
                .histogram_snapshot(US_PER_MS),
        }
    }

    fn grouped_counter(
        &self,
        metric: MetricId,
        key: KeyId,
    ) -> impl Iterator<Item = (String, u64)> + '_ {
        self.registry
            .query(metric)
            .where_has(key)
            .group_by([key])
            .sum_counter()
            .into_iter()
            .filter_map(move |(tags, n)| Some((self.tag_value(&tags, key)?, n)))
    }

    fn tag_value(&self, tags: &TagSet, key: KeyId) -> Option<String> {
        self.registry.key_str(tags.get(key)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{RequestError, RequestErrorKind};
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::SystemTime;

    fn outcome(status: Option<u16>, latency_ms: u64) -> RequestOutcome {
        RequestOutcome {
            started_at: SystemTime::now(),
            latency: Duration::from_millis(latency_ms),
            status,
            body: Bytes::new(),
            bytes_sent: 100,
            bytes_received: 50,
            error: status.is_none().then(|| RequestError {
                kind: RequestErrorKind::Timeout,
                message: "timed out".into(),
            }),
        }
    }

    fn aggregator() -> MetricsAggregator {
        match MetricsAggregator::new(ExpectedStatuses::default()) {
            Ok(a) => a,
            Err(err) => panic!("{err}"),
        }
    }

    fn check(name: &str, passed: bool) -> CheckResult {
        CheckResult {
            name: Arc::from(name),
            passed,
        }
    }

    #[test]
    fn snapshot_reflects_recorded_outcomes() {
        let agg = aggregator();
        agg.record(&outcome(Some(200), 100), &[check("ok", true)]);
        agg.record(&outcome(Some(500), 300), &[check("ok", false)]);
        agg.record(&outcome(None, 200), &[check("ok", false)]);
        agg.record_iteration(Duration::from_millis(120));
        agg.record_interrupted(2);
        agg.set_vus(3);
        agg.set_vus(1);

        let s = agg.snapshot();
        assert_eq!(s.total_requests, 3);
        assert_eq!(s.failed_requests, 2);
        assert_eq!(s.error_count, 1);
        assert_eq!(s.errors_by_kind.get("timeout"), Some(&1));
        assert_eq!(s.status_count(200), 1);
        assert_eq!(s.status_count(500), 1);
        assert_eq!(s.bytes_sent, 300);
        assert_eq!(s.bytes_received, 150);
        assert_eq!(s.iterations, 1);
        assert_eq!(s.interrupted_iterations, 2);
        assert_eq!(s.vus, 1);
        assert_eq!(s.vus_max, 3);
        assert_eq!(s.check("ok"), Some(CheckCounts { passes: 1, fails: 2 }));
        assert_eq!(s.latency.count(), 3);
        assert!(s.percentile(0.0).is_some_and(|v| (v - 100.0).abs() < 0.5));
    }

    #[test]
    fn concurrent_records_are_not_lost() {
        let agg = Arc::new(aggregator());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let agg = agg.clone();
                std::thread::spawn(move || {
                    for i in 0..500 {
                        agg.record(&outcome(Some(200), i % 50 + 1), &[check("c", i % 2 == 0)]);
                    }
                })
            })
            .collect();
        for t in threads {
            if t.join().is_err() {
                panic!("recorder thread panicked");
            }
        }

        let s = agg.snapshot();
        assert_eq!(s.total_requests, 4000);
        assert_eq!(agg.total_requests(), 4000);
        assert_eq!(s.latency.count(), 4000);
        assert_eq!(s.check("c"), Some(CheckCounts { passes: 2000, fails: 2000 }));
    }

    #[test]
    fn known_metrics_have_kinds() {
        let agg = aggregator();
        assert_eq!(agg.metric_kind("checks"), Some(MetricKind::Rate));
        assert_eq!(agg.metric_kind("http_req_duration"), Some(MetricKind::Histogram));
        assert_eq!(agg.metric_kind("vus_max"), Some(MetricKind::Gauge));
        assert_eq!(agg.metric_kind("pass-rate"), None);
    }
}
