use crate::Error;
use crate::run::RunReport;
use crate::thresholds_eval::RunVerdict;

/// Process exit status for a load-test run. Failed checks alone do not fail a run; gate them
/// with a `checks` threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// One or more thresholds failed.
    ThresholdsFailed = 11,

    /// Invalid stages, options, thresholds or scenario file.
    InvalidInput = 30,

    /// IO errors, task failures.
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn from_verdict(verdict: &RunVerdict) -> Self {
        if verdict.passed {
            Self::Success
        } else {
            Self::ThresholdsFailed
        }
    }

    #[must_use]
    pub fn from_report(report: &RunReport) -> Self {
        Self::from_verdict(&report.verdict)
    }

    #[must_use]
    pub fn from_error(err: &Error) -> Self {
        if err.is_config() {
            Self::InvalidInput
        } else {
            Self::RuntimeError
        }
    }

    #[must_use]
    pub fn from_result(result: &crate::Result<RunReport>) -> Self {
        match result {
            Ok(report) => Self::from_report(report),
            Err(err) => Self::from_error(err),
        }
    }
}
