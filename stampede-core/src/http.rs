mod client;
mod estimate;

use bytes::Bytes;
use std::future::Future;

use crate::executor::RequestErrorKind;

pub use client::HttpClient;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("only http:// URLs are supported: {0}")]
    OnlyHttpSupported(String),

    #[error("http request build failed: {0}")]
    RequestBuild(#[from] http::Error),

    #[error("invalid http header name: {0}")]
    HeaderName(#[from] http::header::InvalidHeaderName),

    #[error("invalid http header value: {0}")]
    HeaderValue(#[from] http::header::InvalidHeaderValue),

    #[error("http request failed: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),

    #[error("failed to read response body: {0}")]
    BodyRead(#[from] hyper::Error),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl Error {
    /// Error category used for the `error_kind` metric tag.
    pub fn kind(&self) -> RequestErrorKind {
        match self {
            Self::InvalidUrl(_)
            | Self::OnlyHttpSupported(_)
            | Self::RequestBuild(_)
            | Self::HeaderName(_)
            | Self::HeaderValue(_) => RequestErrorKind::InvalidRequest,
            Self::Request(err) if err.is_connect() => RequestErrorKind::Connect,
            Self::Request(_) | Self::Transport(_) => RequestErrorKind::Transport,
            Self::BodyRead(_) => RequestErrorKind::Body,
            Self::Connect(_) => RequestErrorKind::Connect,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: http::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpRequest {
    pub fn get(url: &str) -> Self {
        Self {
            method: http::Method::GET,
            url: url.to_string(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
    /// Estimated bytes sent on the wire for this request (HTTP/1.1 request line + headers + body).
    pub bytes_sent: u64,
    /// Estimated bytes received on the wire for this response (HTTP/1.1 status line + headers + body).
    pub bytes_received: u64,
}

impl HttpResponse {
    pub fn body_utf8(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

/// Sends one request and reads the full response.
///
/// Implemented by [`HttpClient`]; tests substitute scripted transports.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, req: HttpRequest) -> impl Future<Output = Result<HttpResponse>> + Send;
}

impl Transport for HttpClient {
    fn send(&self, req: HttpRequest) -> impl Future<Output = Result<HttpResponse>> + Send {
        self.request(req)
    }
}

fn has_header(headers: &[(String, String)], name: &str) -> bool {
    headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
}

fn host_header_value(parsed: &url::Url) -> Option<String> {
    let host = parsed.host_str()?;
    match parsed.port() {
        Some(port) if port != 80 => Some(format!("{host}:{port}")),
        _ => Some(host.to_string()),
    }
}
