use bytes::Bytes;
use std::ops::RangeInclusive;
use std::time::Duration;

use crate::checks::{Check, CheckSet};
use crate::http::HttpRequest;
use crate::payload::Payload;
use crate::{Error, Result};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-iteration data handed to payload generators.
#[derive(Debug, Clone, Copy)]
pub struct IterationContext<'a> {
    pub vu_id: u64,
    /// Zero-based iteration index within this VU.
    pub iteration: u64,
    pub scenario: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTemplate {
    pub method: http::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl RequestTemplate {
    pub fn new(method: http::Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(http::Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(http::Method::POST, url)
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn validate(&self) -> Result<()> {
        let parsed = url::Url::parse(&self.url)
            .map_err(|err| Error::InvalidRequest(format!("invalid url `{}`: {err}", self.url)))?;
        if parsed.scheme() != "http" {
            return Err(Error::InvalidRequest(format!(
                "only http:// URLs are supported: {}",
                self.url
            )));
        }
        for (k, v) in &self.headers {
            http::header::HeaderName::from_bytes(k.as_bytes())
                .map_err(|err| Error::InvalidRequest(format!("header `{k}`: {err}")))?;
            http::header::HeaderValue::from_str(v)
                .map_err(|err| Error::InvalidRequest(format!("header `{k}` value: {err}")))?;
        }
        Ok(())
    }

    pub fn build(&self, body: Bytes) -> HttpRequest {
        HttpRequest {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body,
        }
    }
}

/// Statuses that count as successful for `http_req_failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedStatuses {
    ranges: Vec<RangeInclusive<u16>>,
}

impl Default for ExpectedStatuses {
    fn default() -> Self {
        Self {
            ranges: vec![200..=399],
        }
    }
}

impl ExpectedStatuses {
    pub fn new(ranges: Vec<RangeInclusive<u16>>) -> Result<Self> {
        if ranges.is_empty() {
            return Err(Error::InvalidRequest(
                "expected statuses must not be empty".to_string(),
            ));
        }
        if let Some(r) = ranges.iter().find(|r| r.is_empty()) {
            return Err(Error::InvalidRequest(format!(
                "empty expected status range {}..={}",
                r.start(),
                r.end()
            )));
        }
        Ok(Self { ranges })
    }

    pub fn contains(&self, status: u16) -> bool {
        self.ranges.iter().any(|r| r.contains(&status))
    }
}

/// One scenario: what each VU iteration sends and how the response is judged.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,
    pub request: RequestTemplate,
    pub payload: Payload,
    pub checks: CheckSet,
    /// Sleep after each iteration.
    pub pacing: Option<Duration>,
    pub timeout: Duration,
    pub expected_statuses: ExpectedStatuses,
}

impl Scenario {
    pub fn builder(name: impl Into<String>, request: RequestTemplate) -> ScenarioBuilder {
        ScenarioBuilder {
            name: name.into(),
            request,
            payload: Payload::Empty,
            checks: Vec::new(),
            pacing: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            expected_statuses: ExpectedStatuses::default(),
        }
    }

    pub fn request_for(&self, ctx: &IterationContext<'_>) -> HttpRequest {
        self.request.build(self.payload.render(ctx))
    }
}

#[derive(Debug)]
pub struct ScenarioBuilder {
    name: String,
    request: RequestTemplate,
    payload: Payload,
    checks: Vec<Check>,
    pacing: Option<Duration>,
    timeout: Duration,
    expected_statuses: ExpectedStatuses,
}

impl ScenarioBuilder {
    #[must_use]
    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    #[must_use]
    pub fn check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }

    #[must_use]
    pub fn pacing(mut self, pacing: Duration) -> Self {
        self.pacing = Some(pacing).filter(|p| !p.is_zero());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn expected_statuses(mut self, statuses: ExpectedStatuses) -> Self {
        self.expected_statuses = statuses;
        self
    }

    pub fn build(self) -> Result<Scenario> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidRequest(
                "scenario name must not be empty".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(Error::InvalidOptions {
                option: "timeout",
                reason: "must be a positive duration".to_string(),
            });
        }
        self.request.validate()?;

        Ok(Scenario {
            name: self.name,
            request: self.request,
            payload: self.payload,
            checks: CheckSet::new(self.checks)?,
            pacing: self.pacing,
            timeout: self.timeout,
            expected_statuses: self.expected_statuses,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_expected_statuses_match_2xx_and_3xx() {
        let s = ExpectedStatuses::default();
        assert!(s.contains(200));
        assert!(s.contains(302));
        assert!(!s.contains(404));
        assert!(!s.contains(199));

        assert!(ExpectedStatuses::new(Vec::new()).is_err());
        let custom = ExpectedStatuses::new(vec![200..=200, 404..=404]);
        assert!(custom.is_ok_and(|s| s.contains(404) && !s.contains(201)));
    }

    #[test]
    fn builder_validates_request() {
        let err = Scenario::builder("s", RequestTemplate::get("https://example.com/")).build();
        assert!(matches!(err, Err(Error::InvalidRequest(_))));

        let err = Scenario::builder("s", RequestTemplate::get("not a url")).build();
        assert!(matches!(err, Err(Error::InvalidRequest(_))));

        let err = Scenario::builder(
            "s",
            RequestTemplate::get("http://localhost/").header("bad header", "x"),
        )
        .build();
        assert!(matches!(err, Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn request_for_renders_payload_per_iteration() -> Result<()> {
        let scenario = Scenario::builder(
            "gen",
            RequestTemplate::post("http://localhost:3000/echo").header("x-test", "1"),
        )
        .payload(Payload::generated(|ctx| {
            Bytes::from(format!("{}:{}:{}", ctx.scenario, ctx.vu_id, ctx.iteration))
        }))
        .build()?;

        let req = scenario.request_for(&IterationContext {
            vu_id: 3,
            iteration: 7,
            scenario: &scenario.name,
        });
        assert_eq!(req.method, http::Method::POST);
        assert_eq!(&req.body[..], b"gen:3:7");
        assert_eq!(req.headers.len(), 1);
        assert_eq!(scenario.timeout, DEFAULT_REQUEST_TIMEOUT);
        Ok(())
    }
}
