use bytes::Bytes;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;

use crate::http::{HttpRequest, Transport};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum RequestErrorKind {
    Timeout,
    Connect,
    InvalidRequest,
    Body,
    Transport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestError {
    pub kind: RequestErrorKind,
    pub message: String,
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Result of one executed request. `status` is `None` exactly when `error` is set.
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    pub started_at: SystemTime,
    pub latency: Duration,
    pub status: Option<u16>,
    pub body: Bytes,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub error: Option<RequestError>,
}

impl RequestOutcome {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn body_utf8(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    fn failed(started_at: SystemTime, latency: Duration, error: RequestError) -> Self {
        Self {
            started_at,
            latency,
            status: None,
            body: Bytes::new(),
            bytes_sent: 0,
            bytes_received: 0,
            error: Some(error),
        }
    }
}

/// Issues `req` through `transport`, bounded by `timeout`.
///
/// Never fails: transport errors and timeouts are reported inside the outcome.
pub async fn execute<T: Transport>(
    transport: &T,
    req: HttpRequest,
    timeout: Duration,
) -> RequestOutcome {
    let started_at = SystemTime::now();
    let start = Instant::now();

    let res = tokio::time::timeout(timeout, transport.send(req)).await;
    let latency = start.elapsed();

    match res {
        Ok(Ok(res)) => RequestOutcome {
            started_at,
            latency,
            status: Some(res.status),
            body: res.body,
            bytes_sent: res.bytes_sent,
            bytes_received: res.bytes_received,
            error: None,
        },
        Ok(Err(err)) => RequestOutcome::failed(
            started_at,
            latency,
            RequestError {
                kind: err.kind(),
                message: err.to_string(),
            },
        ),
        Err(_) => RequestOutcome::failed(
            started_at,
            latency,
            RequestError {
                kind: RequestErrorKind::Timeout,
                message: format!("request timed out after {timeout:?}"),
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Error, HttpResponse, Result};

    struct Scripted {
        delay: Duration,
        fail: bool,
    }

    impl Transport for Scripted {
        async fn send(&self, _req: HttpRequest) -> Result<HttpResponse> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(Error::Connect("connection refused".into()));
            }
            Ok(HttpResponse {
                status: 503,
                body: Bytes::from_static(b"busy"),
                bytes_sent: 10,
                bytes_received: 20,
            })
        }
    }

    #[tokio::test]
    async fn non_2xx_is_an_ordinary_outcome() {
        let t = Scripted {
            delay: Duration::ZERO,
            fail: false,
        };
        let out = execute(&t, HttpRequest::get("http://x/"), Duration::from_secs(1)).await;
        assert_eq!(out.status, Some(503));
        assert!(out.error.is_none());
        assert_eq!(out.body_utf8(), Some("busy"));
        assert_eq!((out.bytes_sent, out.bytes_received), (10, 20));
    }

    #[tokio::test]
    async fn transport_error_is_captured() {
        let t = Scripted {
            delay: Duration::ZERO,
            fail: true,
        };
        let out = execute(&t, HttpRequest::get("http://x/"), Duration::from_secs(1)).await;
        assert_eq!(out.status, None);
        assert!(matches!(
            out.error,
            Some(RequestError {
                kind: RequestErrorKind::Connect,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_yields_timeout_error() {
        let t = Scripted {
            delay: Duration::from_secs(10),
            fail: false,
        };
        let out = execute(&t, HttpRequest::get("http://x/"), Duration::from_millis(200)).await;
        assert!(out.is_error());
        assert_eq!(out.status, None);
        assert_eq!(
            out.error.as_ref().map(|e| e.kind),
            Some(RequestErrorKind::Timeout)
        );
        assert!(out.latency >= Duration::from_millis(200));
    }
}
