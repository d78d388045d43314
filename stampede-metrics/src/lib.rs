pub mod agg;
pub mod key;
pub mod metrics;
pub mod registry;
pub mod tags;

pub use agg::{CounterSnapshot, Query, per_sec};
pub use key::KeyId;
pub use metrics::{HistogramSnapshot, HistogramSummary, MetricHandle, MetricKind};
pub use registry::{MetricId, Registry};
pub use tags::TagSet;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("metric `{name}` is already registered as {registered}, not {requested}")]
    KindMismatch {
        name: String,
        registered: MetricKind,
        requested: MetricKind,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
