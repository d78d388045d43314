use std::collections::HashMap;
use std::sync::atomic::Ordering;

use hdrhistogram::Histogram;
use smallvec::SmallVec;

use crate::key::KeyId;
use crate::metrics::{HistogramSnapshot, MetricStorage, new_histogram};
use crate::registry::{MetricId, Registry};
use crate::tags::TagSet;

/// Monotonic counter reading, used to derive per-interval deltas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub total: u64,
}

impl CounterSnapshot {
    pub fn new(total: u64) -> Self {
        Self { total }
    }

    pub fn delta_since(self, prev: Option<Self>) -> u64 {
        match prev {
            Some(prev) => self.total.saturating_sub(prev.total),
            None => self.total,
        }
    }

    pub fn per_sec_since(self, prev: Option<Self>, dt_secs: f64) -> f64 {
        per_sec(self.delta_since(prev), dt_secs)
    }
}

#[inline]
pub fn per_sec(delta: u64, dt_secs: f64) -> f64 {
    let dt = dt_secs.max(1e-9);
    delta as f64 / dt
}

/// Fold over the series of one metric, optionally filtered by tags and grouped by tag keys.
#[derive(Debug, Clone)]
pub struct Query<'a> {
    registry: &'a Registry,
    metric: MetricId,
    required: SmallVec<[KeyId; 4]>,
    group_keys: SmallVec<[KeyId; 4]>,
}

impl<'a> Query<'a> {
    pub(crate) fn new(registry: &'a Registry, metric: MetricId) -> Self {
        Self {
            registry,
            metric,
            required: SmallVec::new(),
            group_keys: SmallVec::new(),
        }
    }

    /// Keeps only series carrying `key`, whatever its value.
    #[must_use]
    pub fn where_has(mut self, key: KeyId) -> Self {
        self.required.push(key);
        self
    }

    #[must_use]
    pub fn group_by(mut self, keys: impl IntoIterator<Item = KeyId>) -> Self {
        self.group_keys = keys.into_iter().collect();
        self.group_keys.sort_unstable();
        self.group_keys.dedup();
        self
    }

    fn matches(&self, tags: &TagSet) -> bool {
        self.required.iter().all(|k| tags.get(*k).is_some())
    }

    fn group_key(&self, tags: &TagSet) -> TagSet {
        tags.project(&self.group_keys)
    }

    pub fn sum_counter(self) -> HashMap<TagSet, u64> {
        let mut out: HashMap<TagSet, u64> = HashMap::new();

        self.registry.visit_series(self.metric, |tags, storage| {
            if !self.matches(tags) {
                return;
            }
            let MetricStorage::Counter(c) = storage else {
                return;
            };

            let v = c.load(Ordering::Relaxed);
            if v == 0 {
                return;
            }

            let k = self.group_key(tags);
            out.entry(k)
                .and_modify(|cur| *cur = cur.saturating_add(v))
                .or_insert(v);
        });

        out
    }

    pub fn sum_counter_total(self) -> u64 {
        self.sum_counter().values().copied().sum()
    }

    /// Sums `(total, hits)` per group.
    pub fn sum_rate(self) -> HashMap<TagSet, (u64, u64)> {
        let mut out: HashMap<TagSet, (u64, u64)> = HashMap::new();

        self.registry.visit_series(self.metric, |tags, storage| {
            if !self.matches(tags) {
                return;
            }
            let MetricStorage::Rate(r) = storage else {
                return;
            };

            let (total, hits) = r.load();
            if total == 0 {
                return;
            }

            let entry = out.entry(self.group_key(tags)).or_default();
            entry.0 = entry.0.saturating_add(total);
            entry.1 = entry.1.saturating_add(hits);
        });

        out
    }

    pub fn sum_rate_total(self) -> (u64, u64) {
        self.sum_rate()
            .values()
            .fold((0, 0), |(t, h), (dt, dh)| (t + dt, h + dh))
    }

    /// Highest gauge value across matching series, if any series exists.
    pub fn max_gauge(self) -> Option<i64> {
        let mut out: Option<i64> = None;
        self.registry.visit_series(self.metric, |tags, storage| {
            if !self.matches(tags) {
                return;
            }
            if let MetricStorage::Gauge(g) = storage {
                let v = g.load(Ordering::Relaxed);
                out = Some(out.map_or(v, |cur| cur.max(v)));
            }
        });
        out
    }

    pub fn merge_histogram(self) -> HashMap<TagSet, Histogram<u64>> {
        let mut acc: HashMap<TagSet, Histogram<u64>> = HashMap::new();

        self.registry.visit_series(self.metric, |tags, storage| {
            if !self.matches(tags) {
                return;
            }
            let MetricStorage::Histogram(h) = storage else {
                return;
            };

            let entry = acc
                .entry(self.group_key(tags))
                .or_insert_with(new_histogram);

            let h = h.lock();
            let _ = entry.add(&*h);
        });

        acc
    }

    /// Merges every matching series into one snapshot, ignoring any grouping.
    pub fn histogram_snapshot(self, scale: f64) -> HistogramSnapshot {
        let mut merged = new_histogram();
        for h in self.merge_histogram().values() {
            let _ = merged.add(h);
        }
        HistogramSnapshot::new(merged, scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;
    use crate::metrics::MetricKind;

    #[test]
    fn counter_snapshot_delta_and_rate() {
        let now = CounterSnapshot::new(10);
        assert_eq!(now.delta_since(None), 10);
        assert_eq!(now.delta_since(Some(CounterSnapshot::new(7))), 3);
        assert_eq!(now.delta_since(Some(CounterSnapshot::new(999))), 0);
        assert!((now.per_sec_since(Some(CounterSnapshot::new(0)), 2.0) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn query_filters_and_groups_counters() -> Result<()> {
        let reg = Registry::default();
        let reqs = reg.register("http_reqs", MetricKind::Counter)?;

        for (status, n) in [(Some("200"), 3), (Some("500"), 2), (None, 4)] {
            let tags = match status {
                Some(status) => reg.resolve_tags(&[("status", status)]),
                None => reg.resolve_tags(&[("error", "timeout")]),
            };
            if let Some(h) = reg.handle(reqs, tags) {
                h.add(n);
            }
        }

        let status = reg.resolve_key("status");
        assert_eq!(reg.query(reqs).sum_counter_total(), 9);
        assert_eq!(reg.query(reqs).where_has(status).sum_counter_total(), 5);

        let grouped = reg.query(reqs).where_has(status).group_by([status]).sum_counter();
        assert_eq!(grouped.len(), 2);
        assert_eq!(
            grouped.get(&reg.resolve_tags(&[("status", "200")])),
            Some(&3)
        );
        Ok(())
    }

    #[test]
    fn rates_sum_per_group() -> Result<()> {
        let reg = Registry::default();
        let checks = reg.register("checks", MetricKind::Rate)?;

        let a = reg.resolve_tags(&[("check", "a")]);
        let b = reg.resolve_tags(&[("check", "b")]);
        let (Some(ha), Some(hb)) = (reg.handle(checks, a.clone()), reg.handle(checks, b)) else {
            panic!("series should be created");
        };
        ha.observe(true);
        ha.observe(false);
        hb.observe(true);

        assert_eq!(reg.query(checks).sum_rate_total(), (3, 2));

        let key = reg.resolve_key("check");
        let grouped = reg.query(checks).group_by([key]).sum_rate();
        assert_eq!(grouped.get(&a), Some(&(2, 1)));
        Ok(())
    }

    #[test]
    fn histograms_merge_across_series() -> Result<()> {
        let reg = Registry::default();
        let dur = reg.register("http_req_duration", MetricKind::Histogram)?;

        for (status, v) in [("200", 1_000), ("500", 3_000)] {
            if let Some(h) = reg.handle(dur, reg.resolve_tags(&[("status", status)])) {
                h.record(v);
            }
        }

        let snap = reg.query(dur).histogram_snapshot(1000.0);
        assert_eq!(snap.count(), 2);
        assert_eq!(snap.min(), Some(1.0));
        Ok(())
    }

    #[test]
    fn max_gauge_is_none_without_series() -> Result<()> {
        let reg = Registry::default();
        let vus = reg.register("vus", MetricKind::Gauge)?;
        assert_eq!(reg.query(vus).max_gauge(), None);

        if let Some(h) = reg.handle(vus, TagSet::default()) {
            h.set(4);
        }
        assert_eq!(reg.query(vus).max_gauge(), Some(4));
        Ok(())
    }
}
