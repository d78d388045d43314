use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use stampede_metrics::MetricKind;

use crate::request_metrics::{CHECKS, HTTP_REQS, TAG_CHECK, TAG_STATUS};
use crate::{Error, Result};

/// One threshold expression as written by the user, with its abort options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdRule {
    pub expression: String,
    pub abort_on_fail: bool,
    /// Minimum run time before a failing `abort_on_fail` rule may abort.
    pub delay_abort_eval: Option<Duration>,
}

impl ThresholdRule {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            abort_on_fail: false,
            delay_abort_eval: None,
        }
    }

    #[must_use]
    pub fn abort_on_fail(mut self, delay: Option<Duration>) -> Self {
        self.abort_on_fail = true;
        self.delay_abort_eval = delay;
        self
    }
}

/// Thresholds keyed by a metric (`http_req_duration`) or submetric (`checks{check:ok}`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdSet {
    pub metric: String,
    pub rules: Vec<ThresholdRule>,
}

impl ThresholdSet {
    pub fn new<S: Into<String>>(
        metric: impl Into<String>,
        exprs: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            metric: metric.into(),
            rules: exprs.into_iter().map(ThresholdRule::new).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ThresholdOp {
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Lte,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Gte,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    Ne,
}

impl ThresholdOp {
    pub fn compare(self, observed: f64, expected: f64) -> bool {
        match self {
            Self::Lt => observed < expected,
            Self::Lte => observed <= expected,
            Self::Gt => observed > expected,
            Self::Gte => observed >= expected,
            Self::Eq => observed == expected,
            Self::Ne => observed != expected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdAgg {
    Avg,
    Min,
    Max,
    Med,
    Count,
    Rate,
    Value,
    /// Percentile in `(0, 100]`.
    P(f64),
}

impl fmt::Display for ThresholdAgg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Avg => f.write_str("avg"),
            Self::Min => f.write_str("min"),
            Self::Max => f.write_str("max"),
            Self::Med => f.write_str("med"),
            Self::Count => f.write_str("count"),
            Self::Rate => f.write_str("rate"),
            Self::Value => f.write_str("value"),
            Self::P(p) => write!(f, "p({p})"),
        }
    }
}

impl ThresholdAgg {
    pub fn supports(self, kind: MetricKind) -> bool {
        match kind {
            MetricKind::Counter => matches!(self, Self::Count | Self::Rate),
            MetricKind::Gauge => matches!(self, Self::Value | Self::Max),
            MetricKind::Rate => matches!(self, Self::Rate),
            MetricKind::Histogram => matches!(
                self,
                Self::Avg | Self::Min | Self::Max | Self::Med | Self::Count | Self::P(_)
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdExpr {
    pub agg: ThresholdAgg,
    pub op: ThresholdOp,
    pub value: f64,
}

pub fn parse_threshold_expr(raw: &str) -> std::result::Result<ThresholdExpr, String> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return Err("empty threshold".to_string());
    }

    // Two-char operators first so `<=` is not read as `<`.
    let ops = [
        ("<=", ThresholdOp::Lte),
        (">=", ThresholdOp::Gte),
        ("==", ThresholdOp::Eq),
        ("!=", ThresholdOp::Ne),
        ("<", ThresholdOp::Lt),
        (">", ThresholdOp::Gt),
    ];
    let (op_pos, op_len, op) = ops
        .iter()
        .find_map(|(tok, op)| s.find(tok).map(|pos| (pos, tok.len(), *op)))
        .ok_or_else(|| format!("invalid threshold (missing operator): {raw}"))?;

    let (left, right_with_op) = s.split_at(op_pos);
    let right = &right_with_op[op_len..];
    if left.is_empty() || right.is_empty() {
        return Err(format!("invalid threshold: {raw}"));
    }

    let lower = left.to_ascii_lowercase();
    let agg = match lower.as_str() {
        "avg" => ThresholdAgg::Avg,
        "min" => ThresholdAgg::Min,
        "max" => ThresholdAgg::Max,
        "med" => ThresholdAgg::Med,
        "count" => ThresholdAgg::Count,
        "rate" => ThresholdAgg::Rate,
        "value" => ThresholdAgg::Value,
        other => {
            let Some(inner) = other.strip_prefix("p(").and_then(|v| v.strip_suffix(')')) else {
                return Err(format!("unknown aggregation `{left}` in threshold: {raw}"));
            };
            let p: f64 = inner
                .parse()
                .map_err(|_| format!("invalid percentile in threshold: {raw}"))?;
            if !(p > 0.0 && p <= 100.0) {
                return Err(format!("percentile out of range in threshold: {raw}"));
            }
            ThresholdAgg::P(p)
        }
    };

    let value: f64 = right
        .parse()
        .map_err(|_| format!("invalid numeric value in threshold: {raw}"))?;
    if !value.is_finite() {
        return Err(format!("threshold value must be finite: {raw}"));
    }

    Ok(ThresholdExpr { agg, op, value })
}

/// Series a threshold reads: a whole metric or one tagged submetric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricSelector {
    Metric(String),
    Check(String),
    Status(u16),
}

impl MetricSelector {
    /// Parses `name` or `name{tag:value}`.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let Some((name, rest)) = raw.split_once('{') else {
            return Ok(Self::Metric(raw.to_string()));
        };

        let invalid = |reason: &str| Error::InvalidThresholdExpr {
            metric: raw.to_string(),
            error: reason.to_string(),
        };

        let inner = rest
            .strip_suffix('}')
            .ok_or_else(|| invalid("submetric selector must end with `}`"))?;
        let (tag, value) = inner
            .split_once(':')
            .ok_or_else(|| invalid("submetric selector must be `{tag:value}`"))?;
        let (name, tag, value) = (name.trim(), tag.trim(), value.trim());
        if value.is_empty() {
            return Err(invalid("submetric value must not be empty"));
        }

        match (name, tag) {
            (CHECKS, TAG_CHECK) => Ok(Self::Check(value.to_string())),
            (HTTP_REQS, TAG_STATUS) => value
                .parse::<u16>()
                .ok()
                .filter(|s| (100..=599).contains(s))
                .map(Self::Status)
                .ok_or_else(|| invalid("status must be an HTTP status code")),
            _ => Err(invalid(
                "only `checks{check:NAME}` and `http_reqs{status:CODE}` submetrics are supported",
            )),
        }
    }

    pub fn metric_name(&self) -> &str {
        match self {
            Self::Metric(name) => name,
            Self::Check(_) => CHECKS,
            Self::Status(_) => HTTP_REQS,
        }
    }
}

/// A validated threshold, ready for evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSpec {
    /// Metric key as written (`checks{check:ok}`).
    pub metric: String,
    pub selector: MetricSelector,
    pub kind: MetricKind,
    /// Expression as written.
    pub expression: String,
    pub expr: ThresholdExpr,
    pub abort_on_fail: bool,
    pub delay_abort_eval: Option<Duration>,
}

/// Parses and validates every threshold before the run starts.
///
/// `metric_kind` resolves built-in metric names; `check_names` are the scenario's checks.
pub fn compile_thresholds<'a>(
    sets: &[ThresholdSet],
    metric_kind: impl Fn(&str) -> Option<MetricKind>,
    check_names: impl IntoIterator<Item = &'a str>,
) -> Result<Vec<ThresholdSpec>> {
    let check_names: HashSet<&str> = check_names.into_iter().collect();
    let mut out = Vec::new();

    for set in sets {
        let selector = MetricSelector::parse(&set.metric)?;
        let kind = metric_kind(selector.metric_name())
            .ok_or_else(|| Error::UnknownThresholdMetric(set.metric.clone()))?;

        if let MetricSelector::Check(name) = &selector
            && !check_names.contains(name.as_str())
        {
            return Err(Error::UnknownThresholdMetric(set.metric.clone()));
        }

        if set.rules.is_empty() {
            return Err(Error::InvalidThresholdExpr {
                metric: set.metric.clone(),
                error: "no threshold expressions".to_string(),
            });
        }

        for rule in &set.rules {
            let expr = parse_threshold_expr(&rule.expression).map_err(|error| {
                Error::InvalidThresholdExpr {
                    metric: set.metric.clone(),
                    error,
                }
            })?;

            if !expr.agg.supports(kind) {
                return Err(Error::UnsupportedAggregation {
                    metric: set.metric.clone(),
                    kind,
                    agg: expr.agg,
                });
            }

            out.push(ThresholdSpec {
                metric: set.metric.clone(),
                selector: selector.clone(),
                kind,
                expression: rule.expression.clone(),
                expr,
                abort_on_fail: rule.abort_on_fail,
                delay_abort_eval: rule.delay_abort_eval,
            });
        }
    }

    Ok(out)
}
