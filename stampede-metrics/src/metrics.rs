use hdrhistogram::Histogram;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Lowest and highest trackable histogram values (recorded in microseconds: 1us..1h).
const HISTOGRAM_LOW: u64 = 1;
const HISTOGRAM_HIGH: u64 = 3_600_000_000;
const HISTOGRAM_SIGFIG: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum MetricKind {
    /// Monotonic sum.
    Counter,
    /// Last written value; also supports a CAS max.
    Gauge,
    /// Fraction of `hits` over `total` (pass rate, failure rate).
    Rate,
    /// HDR distribution of non-negative values.
    Histogram,
}

pub(crate) fn new_histogram() -> Histogram<u64> {
    match Histogram::<u64>::new_with_bounds(HISTOGRAM_LOW, HISTOGRAM_HIGH, HISTOGRAM_SIGFIG) {
        Ok(h) => h,
        Err(err) => panic!("histogram bounds are constant and valid: {err}"),
    }
}

#[derive(Debug)]
pub struct Rate {
    pub total: AtomicU64,
    pub hits: AtomicU64,
}

impl Rate {
    fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        }
    }

    /// Returns `(total, hits)`.
    pub fn load(&self) -> (u64, u64) {
        // `hits` is read first so a concurrent writer can never make hits > total.
        let hits = self.hits.load(Ordering::Acquire);
        let total = self.total.load(Ordering::Acquire);
        (total.max(hits), hits)
    }
}

#[derive(Debug)]
pub(crate) enum MetricStorage {
    Counter(Arc<AtomicU64>),
    Gauge(Arc<AtomicI64>),
    Rate(Arc<Rate>),
    Histogram(Arc<Mutex<Histogram<u64>>>),
}

impl MetricStorage {
    pub(crate) fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Self::Counter(Arc::new(AtomicU64::new(0))),
            MetricKind::Gauge => Self::Gauge(Arc::new(AtomicI64::new(0))),
            MetricKind::Rate => Self::Rate(Arc::new(Rate::new())),
            MetricKind::Histogram => Self::Histogram(Arc::new(Mutex::new(new_histogram()))),
        }
    }

    pub(crate) fn handle(&self) -> MetricHandle {
        match self {
            Self::Counter(a) => MetricHandle::Counter(a.clone()),
            Self::Gauge(a) => MetricHandle::Gauge(a.clone()),
            Self::Rate(a) => MetricHandle::Rate(a.clone()),
            Self::Histogram(a) => MetricHandle::Histogram(a.clone()),
        }
    }
}

/// Write handle for one metric series. Cheap to clone and safe to share across tasks.
#[derive(Debug, Clone)]
pub enum MetricHandle {
    Counter(Arc<AtomicU64>),
    Gauge(Arc<AtomicI64>),
    Rate(Arc<Rate>),
    Histogram(Arc<Mutex<Histogram<u64>>>),
}

impl MetricHandle {
    #[inline]
    pub fn add(&self, value: u64) {
        if let Self::Counter(c) = self {
            c.fetch_add(value, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn set(&self, value: i64) {
        if let Self::Gauge(g) = self {
            g.store(value, Ordering::Relaxed);
        }
    }

    /// Raises the gauge to `value` if it is currently lower.
    #[inline]
    pub fn set_max(&self, value: i64) {
        if let Self::Gauge(g) = self {
            g.fetch_max(value, Ordering::Relaxed);
        }
    }

    /// Records one boolean observation: `hit` counts towards the rate's numerator.
    #[inline]
    pub fn observe(&self, hit: bool) {
        if let Self::Rate(r) = self {
            // Bump `total` before `hits`; readers load in the opposite order.
            r.total.fetch_add(1, Ordering::AcqRel);
            if hit {
                r.hits.fetch_add(1, Ordering::AcqRel);
            }
        }
    }

    #[inline]
    pub fn record(&self, value: u64) {
        if let Self::Histogram(h) = self {
            h.lock().saturating_record(value.max(HISTOGRAM_LOW));
        }
    }

    pub fn counter(&self) -> u64 {
        match self {
            Self::Counter(c) => c.load(Ordering::Relaxed),
            _ => 0,
        }
    }

    pub fn gauge(&self) -> i64 {
        match self {
            Self::Gauge(g) => g.load(Ordering::Relaxed),
            _ => 0,
        }
    }

    /// Returns `(total, hits)` for rate handles.
    pub fn rate(&self) -> (u64, u64) {
        match self {
            Self::Rate(r) => r.load(),
            _ => (0, 0),
        }
    }
}

/// Point-in-time summary of a histogram, values already scaled to the reporting unit.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSummary {
    pub count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub stdev: Option<f64>,
    pub p50: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
}

/// Owned copy of a histogram. Recorded values are divided by `scale` when read,
/// so a microsecond histogram with `scale = 1000.0` reports milliseconds.
#[derive(Debug, Clone)]
pub struct HistogramSnapshot {
    hist: Histogram<u64>,
    scale: f64,
}

impl HistogramSnapshot {
    pub fn new(hist: Histogram<u64>, scale: f64) -> Self {
        Self {
            hist,
            scale: if scale > 0.0 { scale } else { 1.0 },
        }
    }

    pub fn empty(scale: f64) -> Self {
        Self::new(new_histogram(), scale)
    }

    pub fn count(&self) -> u64 {
        self.hist.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hist.is_empty()
    }

    fn scaled(&self, v: u64) -> f64 {
        v as f64 / self.scale
    }

    pub fn min(&self) -> Option<f64> {
        (!self.is_empty()).then(|| self.scaled(self.hist.min()))
    }

    pub fn max(&self) -> Option<f64> {
        (!self.is_empty()).then(|| self.scaled(self.hist.max()))
    }

    pub fn mean(&self) -> Option<f64> {
        (!self.is_empty()).then(|| self.hist.mean() / self.scale)
    }

    pub fn stdev(&self) -> Option<f64> {
        (!self.is_empty()).then(|| self.hist.stdev() / self.scale)
    }

    /// Value at percentile `p` in `[0, 100]`.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if self.is_empty() || !(0.0..=100.0).contains(&p) {
            return None;
        }
        Some(self.scaled(self.hist.value_at_percentile(p)))
    }

    pub fn summary(&self) -> HistogramSummary {
        HistogramSummary {
            count: self.count(),
            min: self.min(),
            max: self.max(),
            mean: self.mean(),
            stdev: self.stdev(),
            p50: self.percentile(50.0),
            p90: self.percentile(90.0),
            p95: self.percentile(95.0),
            p99: self.percentile(99.0),
        }
    }
}
