use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;

use crate::checks::Check;
use crate::config::{SchedulerOptions, Stage};
use crate::payload::{Payload, RepeatedText};
use crate::run::RunPlan;
use crate::scenario::{ExpectedStatuses, RequestTemplate, Scenario};
use crate::thresholds::{ThresholdRule, ThresholdSet};
use crate::{Error, Result};

/// A YAML scenario document.
///
/// ```yaml
/// name: process-meeting
/// stages:
///   - { duration: 30s, target: 10 }
///   - { duration: 30s, target: 0 }
/// thresholds:
///   http_req_duration: "p(95)<15000"
///   checks:
///     - rate>0.95
///     - { threshold: "rate>0.5", abort_on_fail: true, delay_abort_eval: 10s }
/// request:
///   method: POST
///   url: http://localhost:8080/process-meeting
///   headers: { content-type: application/json }
/// payload:
///   type: repeated_text
///   field: text
///   lines: ["Speaker 1: hello\n"]
///   size: 50000
/// checks:
///   - { name: status is 200, status: 200 }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioFile {
    name: String,
    stages: Vec<StageYaml>,
    #[serde(default)]
    thresholds: BTreeMap<String, ThresholdYaml>,
    request: RequestYaml,
    #[serde(default)]
    payload: Option<PayloadYaml>,
    #[serde(default)]
    checks: Vec<CheckYaml>,
    #[serde(default)]
    pacing: Option<YamlDuration>,
    #[serde(default)]
    options: OptionsYaml,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct StageYaml {
    duration: YamlDuration,
    target: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ThresholdYaml {
    One(ThresholdEntryYaml),
    Many(Vec<ThresholdEntryYaml>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ThresholdEntryYaml {
    Expr(String),
    Rule {
        threshold: String,
        #[serde(default)]
        abort_on_fail: bool,
        #[serde(default)]
        delay_abort_eval: Option<YamlDuration>,
    },
}

impl From<ThresholdEntryYaml> for ThresholdRule {
    fn from(value: ThresholdEntryYaml) -> Self {
        match value {
            ThresholdEntryYaml::Expr(expr) => ThresholdRule::new(expr),
            ThresholdEntryYaml::Rule {
                threshold,
                abort_on_fail,
                delay_abort_eval,
            } => {
                let rule = ThresholdRule::new(threshold);
                if abort_on_fail {
                    rule.abort_on_fail(delay_abort_eval.map(YamlDuration::into_inner))
                } else {
                    rule
                }
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RequestYaml {
    #[serde(default)]
    method: Option<String>,
    url: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    timeout: Option<YamlDuration>,
    #[serde(default)]
    expected_statuses: Option<Vec<StatusYaml>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum StatusYaml {
    Code(u16),
    Range { min: u16, max: u16 },
}

impl StatusYaml {
    fn range(&self) -> std::ops::RangeInclusive<u16> {
        match *self {
            Self::Code(code) => code..=code,
            Self::Range { min, max } => min..=max,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum PayloadYaml {
    Static {
        body: String,
    },
    JsonText {
        field: String,
        text: String,
    },
    RepeatedText {
        field: String,
        #[serde(default)]
        preamble: String,
        lines: Vec<String>,
        size: usize,
    },
}

impl PayloadYaml {
    fn into_payload(self) -> Result<Payload> {
        match self {
            Self::Static { body } => Ok(Payload::Static(Bytes::from(body))),
            Self::JsonText { field, text } => Payload::json_text(&field, &text),
            Self::RepeatedText {
                field,
                preamble,
                lines,
                size,
            } => {
                if lines.iter().all(String::is_empty) {
                    return Err(Error::InvalidRequest(
                        "repeated_text payload needs at least one non-empty line".to_string(),
                    ));
                }
                let text = RepeatedText {
                    preamble,
                    lines,
                    size,
                }
                .render();
                Payload::json_text(&field, &text)
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct CheckYaml {
    name: String,
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    body_not_empty: Option<bool>,
    #[serde(default)]
    body_contains: Option<String>,
    #[serde(default)]
    json_field_equals: Option<JsonFieldYaml>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct JsonFieldYaml {
    pointer: String,
    value: serde_json::Value,
}

impl CheckYaml {
    fn into_check(self) -> Result<Check> {
        let Self {
            name,
            status,
            body_not_empty,
            body_contains,
            json_field_equals,
        } = self;

        let mut rules = Vec::with_capacity(1);
        if let Some(code) = status {
            rules.push(Check::status(name.as_str(), code));
        }
        if body_not_empty == Some(true) {
            rules.push(Check::body_not_empty(name.as_str()));
        }
        if let Some(needle) = body_contains {
            rules.push(Check::body_contains(name.as_str(), needle));
        }
        if let Some(field) = json_field_equals {
            rules.push(Check::json_field_equals(
                name.as_str(),
                field.pointer,
                field.value,
            ));
        }

        match (rules.pop(), rules.is_empty()) {
            (Some(check), true) => Ok(check),
            _ => Err(Error::InvalidCheck(format!(
                "check `{name}` must define exactly one of status, body_not_empty, \
                 body_contains, json_field_equals"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct OptionsYaml {
    tick: Option<YamlDuration>,
    graceful_stop: Option<YamlDuration>,
    max_vus: Option<u64>,
    progress_interval: Option<YamlDuration>,
    threshold_eval_interval: Option<YamlDuration>,
}

impl OptionsYaml {
    fn into_options(self) -> SchedulerOptions {
        let defaults = SchedulerOptions::default();
        let or = |v: Option<YamlDuration>, d: Duration| v.map_or(d, YamlDuration::into_inner);
        SchedulerOptions {
            tick: or(self.tick, defaults.tick),
            graceful_stop: or(self.graceful_stop, defaults.graceful_stop),
            max_vus: self.max_vus.or(defaults.max_vus),
            progress_interval: or(self.progress_interval, defaults.progress_interval),
            threshold_eval_interval: or(
                self.threshold_eval_interval,
                defaults.threshold_eval_interval,
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct YamlDuration(Duration);

impl YamlDuration {
    fn into_inner(self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> std::result::Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> std::result::Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let secs = u64::try_from(v)
                    .map_err(|_| E::custom("duration must not be negative"))?;
                Ok(YamlDuration(Duration::from_secs(secs)))
            }

            fn visit_f64<E>(self, v: f64) -> std::result::Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Duration::try_from_secs_f64(v)
                    .map(YamlDuration)
                    .map_err(|_| E::custom("duration must be a non-negative, finite number"))
            }

            fn visit_str<E>(self, v: &str) -> std::result::Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let d = humantime::parse_duration(v).map_err(E::custom)?;
                Ok(YamlDuration(d))
            }
        }

        deserializer.deserialize_any(V)
    }
}

impl ScenarioFile {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|err| Error::InvalidScenarioFile(err.to_string()))
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = tokio::fs::read_to_string(path).await?;
        Self::from_yaml_str(&yaml).map_err(|err| match err {
            Error::InvalidScenarioFile(msg) => {
                Error::InvalidScenarioFile(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Converts the document into a [`RunPlan`]. Stage, request, check and payload errors
    /// surface here; threshold expressions are compiled by `PreparedRun::prepare`.
    pub fn into_plan(self) -> Result<RunPlan> {
        let stages = self
            .stages
            .iter()
            .enumerate()
            .map(|(index, s)| Stage::from_signed(index, s.duration.0.as_secs_f64(), s.target))
            .collect::<Result<Vec<_>>>()?;

        let request = self.request;
        let method = match request.method.as_deref() {
            None => http::Method::GET,
            Some(m) => http::Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                .map_err(|_| Error::InvalidRequest(format!("invalid method `{m}`")))?,
        };
        let mut template = RequestTemplate::new(method, request.url);
        for (name, value) in request.headers {
            template = template.header(name, value);
        }

        let mut builder = Scenario::builder(self.name, template);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout.into_inner());
        }
        if let Some(statuses) = request.expected_statuses {
            let ranges = statuses.iter().map(StatusYaml::range).collect();
            builder = builder.expected_statuses(ExpectedStatuses::new(ranges)?);
        }
        if let Some(payload) = self.payload {
            builder = builder.payload(payload.into_payload()?);
        }
        for check in self.checks {
            builder = builder.check(check.into_check()?);
        }
        if let Some(pacing) = self.pacing {
            builder = builder.pacing(pacing.into_inner());
        }

        let thresholds = self
            .thresholds
            .into_iter()
            .map(|(metric, t)| {
                let rules = match t {
                    ThresholdYaml::One(entry) => vec![entry.into()],
                    ThresholdYaml::Many(entries) => entries.into_iter().map(Into::into).collect(),
                };
                ThresholdSet { metric, rules }
            })
            .collect();

        Ok(RunPlan {
            scenario: builder.build()?,
            stages,
            thresholds,
            options: self.options.into_options(),
        })
    }
}
