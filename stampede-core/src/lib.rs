mod aggregator;
mod checks;
mod config;
mod error;
mod executor;
mod exit_codes;
pub mod http;
mod iteration_metrics;
pub mod logging;
mod payload;
mod progress;
mod request_metrics;
mod run;
mod scenario;
mod scenario_file;
mod schedule;
mod scheduler;
mod snapshot;
mod thresholds;
mod thresholds_eval;
mod vu;

pub use aggregator::MetricsAggregator;
pub use checks::{Check, CheckError, CheckFn, CheckResult, CheckSet};
pub use config::{SchedulerOptions, Stage};
pub use error::{Error, Result};
pub use executor::{RequestError, RequestErrorKind, RequestOutcome, execute};
pub use exit_codes::ExitCode;
pub use http::{HttpClient, HttpRequest, HttpResponse, Transport};
pub use payload::{Payload, PayloadFn, RepeatedText};
pub use progress::{LiveMetrics, ProgressFn, ProgressUpdate};
pub use run::{AbortReason, PreparedRun, RunHandle, RunPlan, RunReport, run};
pub use scenario::{
    DEFAULT_REQUEST_TIMEOUT, ExpectedStatuses, IterationContext, RequestTemplate, Scenario,
    ScenarioBuilder,
};
pub use scenario_file::ScenarioFile;
pub use schedule::{RampingSchedule, StageSnapshot};
pub use scheduler::{RampScheduler, SchedulerSummary, StepResult};
pub use snapshot::{AggregateSnapshot, CheckCounts};
pub use thresholds::{
    MetricSelector, ThresholdAgg, ThresholdExpr, ThresholdOp, ThresholdRule, ThresholdSet,
    ThresholdSpec, compile_thresholds, parse_threshold_expr,
};
pub use thresholds_eval::{
    RunVerdict, ThresholdFailure, abort_failure, evaluate_thresholds, observe,
};
pub use vu::{VuShared, run_iteration, run_vu};

pub use stampede_metrics::{HistogramSnapshot, HistogramSummary, MetricKind};

/// Built-in metric names, usable as threshold keys.
pub mod metric_names {
    pub use crate::iteration_metrics::{
        INTERRUPTED_ITERATIONS, ITERATION_DURATION, ITERATIONS, VUS, VUS_MAX,
    };
    pub use crate::request_metrics::{
        CHECKS, DATA_RECEIVED, DATA_SENT, HTTP_REQ_DURATION, HTTP_REQ_ERRORS, HTTP_REQ_FAILED,
        HTTP_REQS,
    };
}
