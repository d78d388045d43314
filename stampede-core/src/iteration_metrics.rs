use std::time::Duration;

use stampede_metrics::{MetricHandle, MetricId, MetricKind, Registry, TagSet};

use crate::Result;

pub const ITERATIONS: &str = "iterations";
pub const ITERATION_DURATION: &str = "iteration_duration";
pub const INTERRUPTED_ITERATIONS: &str = "interrupted_iterations";
pub const VUS: &str = "vus";
pub const VUS_MAX: &str = "vus_max";

#[derive(Debug, Clone, Copy)]
pub struct IterationMetricIds {
    pub iterations: MetricId,
    /// Iteration duration in microseconds.
    pub duration_us: MetricId,
    pub interrupted: MetricId,
    pub vus: MetricId,
    pub vus_max: MetricId,
}

impl IterationMetricIds {
    pub fn register(metrics: &Registry) -> Result<Self> {
        Ok(Self {
            iterations: metrics.register(ITERATIONS, MetricKind::Counter)?,
            duration_us: metrics.register(ITERATION_DURATION, MetricKind::Histogram)?,
            interrupted: metrics.register(INTERRUPTED_ITERATIONS, MetricKind::Counter)?,
            vus: metrics.register(VUS, MetricKind::Gauge)?,
            vus_max: metrics.register(VUS_MAX, MetricKind::Gauge)?,
        })
    }
}

/// All iteration series are untagged, so handles are resolved up front.
#[derive(Debug, Clone)]
pub(crate) struct IterationHandles {
    iterations: Option<MetricHandle>,
    duration_us: Option<MetricHandle>,
    interrupted: Option<MetricHandle>,
    vus: Option<MetricHandle>,
    vus_max: Option<MetricHandle>,
}

impl IterationHandles {
    pub(crate) fn new(metrics: &Registry, ids: &IterationMetricIds) -> Self {
        let handle = |id| metrics.handle(id, TagSet::default());
        Self {
            iterations: handle(ids.iterations),
            duration_us: handle(ids.duration_us),
            interrupted: handle(ids.interrupted),
            vus: handle(ids.vus),
            vus_max: handle(ids.vus_max),
        }
    }

    pub(crate) fn record_iteration(&self, duration: Duration) {
        if let Some(h) = &self.iterations {
            h.add(1);
        }
        if let Some(h) = &self.duration_us {
            let us: u64 = duration.as_micros().try_into().unwrap_or(u64::MAX);
            h.record(us);
        }
    }

    pub(crate) fn record_interrupted(&self, n: u64) {
        if let Some(h) = &self.interrupted {
            h.add(n);
        }
    }

    pub(crate) fn set_vus(&self, active: u64) {
        let active = i64::try_from(active).unwrap_or(i64::MAX);
        if let Some(h) = &self.vus {
            h.set(active);
        }
        if let Some(h) = &self.vus_max {
            h.set_max(active);
        }
    }
}
