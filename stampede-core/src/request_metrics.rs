use stampede_metrics::{MetricHandle, MetricId, MetricKind, Registry, TagSet};

use crate::Result;
use crate::checks::CheckResult;
use crate::executor::RequestOutcome;
use crate::scenario::ExpectedStatuses;

pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const HTTP_REQ_ERRORS: &str = "http_req_errors";
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const DATA_SENT: &str = "data_sent";
pub const DATA_RECEIVED: &str = "data_received";
pub const CHECKS: &str = "checks";

pub const TAG_STATUS: &str = "status";
pub const TAG_ERROR_KIND: &str = "error_kind";
pub const TAG_CHECK: &str = "check";

#[derive(Debug, Clone, Copy)]
pub struct RequestMetricIds {
    pub requests: MetricId,
    pub failed: MetricId,
    pub errors: MetricId,
    /// Request latency in microseconds.
    pub duration_us: MetricId,
    pub data_sent: MetricId,
    pub data_received: MetricId,
    pub checks: MetricId,
}

impl RequestMetricIds {
    pub fn register(metrics: &Registry) -> Result<Self> {
        Ok(Self {
            requests: metrics.register(HTTP_REQS, MetricKind::Counter)?,
            failed: metrics.register(HTTP_REQ_FAILED, MetricKind::Rate)?,
            errors: metrics.register(HTTP_REQ_ERRORS, MetricKind::Counter)?,
            duration_us: metrics.register(HTTP_REQ_DURATION, MetricKind::Histogram)?,
            data_sent: metrics.register(DATA_SENT, MetricKind::Counter)?,
            data_received: metrics.register(DATA_RECEIVED, MetricKind::Counter)?,
            checks: metrics.register(CHECKS, MetricKind::Rate)?,
        })
    }
}

/// Untagged series resolved once, so the hot path skips the registry for them.
#[derive(Debug, Clone)]
pub(crate) struct RequestHandles {
    failed: Option<MetricHandle>,
    duration_us: Option<MetricHandle>,
    data_sent: Option<MetricHandle>,
    data_received: Option<MetricHandle>,
}

impl RequestHandles {
    pub(crate) fn new(metrics: &Registry, ids: &RequestMetricIds) -> Self {
        let handle = |id| metrics.handle(id, TagSet::default());
        Self {
            failed: handle(ids.failed),
            duration_us: handle(ids.duration_us),
            data_sent: handle(ids.data_sent),
            data_received: handle(ids.data_received),
        }
    }
}

pub(crate) fn record_request(
    metrics: &Registry,
    ids: &RequestMetricIds,
    handles: &RequestHandles,
    expected: &ExpectedStatuses,
    outcome: &RequestOutcome,
    checks: &[CheckResult],
) {
    let tags = match outcome.status {
        Some(status) => metrics.resolve_tags(&[(TAG_STATUS, status.to_string().as_str())]),
        None => TagSet::default(),
    };
    if let Some(h) = metrics.handle(ids.requests, tags) {
        h.add(1);
    }

    let failed = match (&outcome.error, outcome.status) {
        (None, Some(status)) => !expected.contains(status),
        _ => true,
    };
    if let Some(h) = &handles.failed {
        h.observe(failed);
    }

    if let Some(err) = &outcome.error {
        let kind: &'static str = err.kind.into();
        let tags = metrics.resolve_tags(&[(TAG_ERROR_KIND, kind)]);
        if let Some(h) = metrics.handle(ids.errors, tags) {
            h.add(1);
        }
    }

    if let Some(h) = &handles.duration_us {
        let us: u64 = outcome.latency.as_micros().try_into().unwrap_or(u64::MAX);
        h.record(us);
    }
    if let Some(h) = &handles.data_sent {
        h.add(outcome.bytes_sent);
    }
    if let Some(h) = &handles.data_received {
        h.add(outcome.bytes_received);
    }

    for check in checks {
        let tags = metrics.resolve_tags(&[(TAG_CHECK, &*check.name)]);
        if let Some(h) = metrics.handle(ids.checks, tags) {
            h.observe(check.passed);
        }
    }
}
