use dashmap::DashMap;
use parking_lot::RwLock;

use crate::agg::Query;
use crate::key::{Interner, KeyId};
use crate::metrics::{MetricHandle, MetricKind, MetricStorage};
use crate::tags::TagSet;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetricId(u32);

#[derive(Debug)]
struct MetricDef {
    name: KeyId,
    kind: MetricKind,
}

/// Concurrent store of named metrics, each split into tagged series.
///
/// Writers obtain a [`MetricHandle`] per series and update it lock-free (histograms take a
/// short per-series lock). Readers use [`Registry::query`] to fold series together.
#[derive(Debug, Default)]
pub struct Registry {
    interner: Interner,
    defs: RwLock<Vec<MetricDef>>,
    series: DashMap<MetricId, DashMap<TagSet, MetricStorage>>,
}

impl Registry {
    /// Registers a metric, or returns the existing id if the name is taken by the same kind.
    pub fn register(&self, name: &str, kind: MetricKind) -> Result<MetricId> {
        let name_id = self.interner.intern(name);

        let mut defs = self.defs.write();
        if let Some((idx, def)) = defs.iter().enumerate().find(|(_, d)| d.name == name_id) {
            if def.kind != kind {
                return Err(Error::KindMismatch {
                    name: name.to_string(),
                    registered: def.kind,
                    requested: kind,
                });
            }
            return Ok(MetricId(idx as u32));
        }

        let id = MetricId(defs.len() as u32);
        defs.push(MetricDef {
            name: name_id,
            kind,
        });
        self.series.insert(id, DashMap::new());
        Ok(id)
    }

    pub fn lookup(&self, name: &str) -> Option<(MetricId, MetricKind)> {
        let name_id = self.interner.lookup(name)?;
        self.defs
            .read()
            .iter()
            .enumerate()
            .find(|(_, d)| d.name == name_id)
            .map(|(idx, d)| (MetricId(idx as u32), d.kind))
    }

    pub fn kind(&self, metric: MetricId) -> Option<MetricKind> {
        self.defs.read().get(metric.0 as usize).map(|d| d.kind)
    }

    pub fn name(&self, metric: MetricId) -> Option<String> {
        let name = self.defs.read().get(metric.0 as usize)?.name;
        self.interner.resolve(name).map(|s| s.to_string())
    }

    pub fn resolve_key(&self, key: &str) -> KeyId {
        self.interner.intern(key)
    }

    pub fn key_str(&self, id: KeyId) -> Option<String> {
        self.interner.resolve(id).map(|s| s.to_string())
    }

    pub fn resolve_tags(&self, tags: &[(&str, &str)]) -> TagSet {
        TagSet::new(
            tags.iter()
                .map(|(k, v)| (self.resolve_key(k), self.resolve_key(v))),
        )
    }

    /// Returns the write handle for a series, creating the series on first use.
    pub fn handle(&self, metric: MetricId, tags: TagSet) -> Option<MetricHandle> {
        // Read the kind before touching `series`; `register` locks in the opposite order.
        let kind = self.kind(metric)?;
        let series = self.series.get(&metric)?;
        if let Some(storage) = series.get(&tags) {
            return Some(storage.handle());
        }

        // `entry` keeps concurrent first writers on the same storage.
        let storage = series
            .entry(tags)
            .or_insert_with(|| MetricStorage::new(kind));
        Some(storage.handle())
    }

    pub fn query(&self, metric: MetricId) -> Query<'_> {
        Query::new(self, metric)
    }

    pub(crate) fn visit_series(
        &self,
        metric: MetricId,
        mut f: impl FnMut(&TagSet, &MetricStorage),
    ) {
        let Some(series) = self.series.get(&metric) else {
            return;
        };
        for entry in series.iter() {
            f(entry.key(), entry.value());
        }
    }
}
