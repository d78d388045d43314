use crate::thresholds::ThresholdAgg;
use stampede_metrics::MetricKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("`stages` must be a non-empty array of {{ duration, target }}")]
    InvalidStages,

    #[error("invalid stage #{index}: {reason}")]
    InvalidStage { index: usize, reason: String },

    #[error("`stages` must have a positive total duration")]
    ZeroDurationStages,

    #[error("invalid option `{option}`: {reason}")]
    InvalidOptions {
        option: &'static str,
        reason: String,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid check: {0}")]
    InvalidCheck(String),

    #[error("unknown threshold metric `{0}`")]
    UnknownThresholdMetric(String),

    #[error("invalid threshold expression for metric `{metric}`: {error}")]
    InvalidThresholdExpr { metric: String, error: String },

    #[error("aggregation `{agg}` is not supported for {kind} metric `{metric}`")]
    UnsupportedAggregation {
        metric: String,
        kind: MetricKind,
        agg: ThresholdAgg,
    },

    #[error("invalid scenario file: {0}")]
    InvalidScenarioFile(String),

    #[error("metrics error: {0}")]
    Metrics(#[from] stampede_metrics::Error),
}

impl Error {
    /// Whether the error was caused by bad input rather than a runtime failure.
    pub fn is_config(&self) -> bool {
        !matches!(self, Self::Io(_) | Self::Join(_) | Self::Metrics(_))
    }
}
