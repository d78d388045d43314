use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::executor::RequestOutcome;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckError {
    #[error("no response (request failed)")]
    NoResponse,

    #[error("response body is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("{0}")]
    Other(String),
}

pub type CheckFn =
    dyn Fn(&RequestOutcome) -> std::result::Result<bool, CheckError> + Send + Sync + 'static;

/// A named predicate evaluated against every request outcome.
#[derive(Clone)]
pub struct Check {
    name: Arc<str>,
    predicate: Arc<CheckFn>,
}

impl std::fmt::Debug for Check {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Check").field("name", &self.name).finish()
    }
}

impl Check {
    pub fn new<F>(name: impl Into<Arc<str>>, predicate: F) -> Self
    where
        F: Fn(&RequestOutcome) -> std::result::Result<bool, CheckError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Passes when the response status equals `code`.
    pub fn status(name: impl Into<Arc<str>>, code: u16) -> Self {
        Self::new(name, move |o| Ok(o.status == Some(code)))
    }

    /// Passes when a response arrived with a non-empty body.
    pub fn body_not_empty(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, |o| Ok(o.status.is_some() && !o.body.is_empty()))
    }

    pub fn body_contains(name: impl Into<Arc<str>>, needle: impl Into<String>) -> Self {
        let needle = needle.into();
        Self::new(name, move |o| {
            Ok(o.body_utf8().is_some_and(|b| b.contains(needle.as_str())))
        })
    }

    /// Passes when the JSON body has `expected` at `pointer` (RFC 6901, e.g. `/success`).
    /// A body that does not parse fails the check.
    pub fn json_field_equals(
        name: impl Into<Arc<str>>,
        pointer: impl Into<String>,
        expected: serde_json::Value,
    ) -> Self {
        let pointer = pointer.into();
        Self::new(name, move |o| {
            if o.status.is_none() {
                return Err(CheckError::NoResponse);
            }
            let body: serde_json::Value = serde_json::from_slice(&o.body)
                .map_err(|err| CheckError::InvalidJson(err.to_string()))?;
            Ok(body.pointer(&pointer) == Some(&expected))
        })
    }

    /// Runs the predicate. Errors and panics count as a failed check.
    pub fn evaluate(&self, outcome: &RequestOutcome) -> bool {
        match catch_unwind(AssertUnwindSafe(|| (self.predicate)(outcome))) {
            Ok(Ok(passed)) => passed,
            Ok(Err(err)) => {
                tracing::trace!(check = %self.name, error = %err, "check failed with error");
                false
            }
            Err(_) => {
                tracing::warn!(check = %self.name, "check predicate panicked");
                false
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: Arc<str>,
    pub passed: bool,
}

/// Ordered set of uniquely named checks.
#[derive(Debug, Clone, Default)]
pub struct CheckSet {
    checks: Vec<Check>,
}

impl CheckSet {
    pub fn new(checks: Vec<Check>) -> Result<Self> {
        let mut seen = HashSet::new();
        for check in &checks {
            if check.name.trim().is_empty() {
                return Err(Error::InvalidCheck("check name must not be empty".to_string()));
            }
            if !seen.insert(check.name.clone()) {
                return Err(Error::InvalidCheck(format!(
                    "duplicate check name `{}`",
                    check.name
                )));
            }
        }
        Ok(Self { checks })
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.checks.iter().map(Check::name)
    }

    /// Evaluates every check independently; one failing or panicking check never
    /// prevents the others from running.
    pub fn evaluate(&self, outcome: &RequestOutcome) -> Vec<CheckResult> {
        self.checks
            .iter()
            .map(|check| CheckResult {
                name: check.name.clone(),
                passed: check.evaluate(outcome),
            })
            .collect()
    }
}
