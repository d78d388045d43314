use bytes::Bytes;
use http_body_util::{BodyExt as _, Full};
use hyper::Request;
use hyper::body::Incoming;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;

use super::estimate::{request_bytes, response_head_bytes};
use super::{Error, HttpRequest, HttpResponse, Result, has_header, host_header_value};

/// Pooled hyper HTTP/1.1 client. Cloning shares the connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client<HttpConnector, Full<Bytes>>,
}

impl Default for HttpClient {
    fn default() -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);

        let inner = Client::builder(TokioExecutor::new()).build(connector);

        Self { inner }
    }
}

impl HttpClient {
    /// Sends `req` and reads the whole body. No timeout is applied here.
    pub async fn request(&self, req: HttpRequest) -> Result<HttpResponse> {
        let parsed = url::Url::parse(&req.url).map_err(|_| Error::InvalidUrl(req.url.clone()))?;
        if parsed.scheme() != "http" {
            return Err(Error::OnlyHttpSupported(req.url));
        }

        let uri: hyper::Uri = req
            .url
            .parse()
            .map_err(|_| Error::InvalidUrl(req.url.clone()))?;
        let host = host_header_value(&parsed);
        let bytes_sent = request_bytes(
            &req.method,
            &uri,
            &req.headers,
            host.as_deref(),
            req.body.len() as u64,
        );

        let mut builder = Request::builder().method(req.method).uri(uri);

        // Make implicit headers explicit so byte accounting matches what goes on the wire.
        if !has_header(&req.headers, "host")
            && let Some(host) = host
        {
            builder = builder.header(http::header::HOST, host);
        }
        if !req.body.is_empty() && !has_header(&req.headers, "content-length") {
            builder = builder.header(http::header::CONTENT_LENGTH, req.body.len());
        }

        for (k, v) in req.headers {
            let name = http::header::HeaderName::from_bytes(k.as_bytes())?;
            let value = http::header::HeaderValue::from_str(&v)?;
            builder = builder.header(name, value);
        }

        let req: Request<Full<Bytes>> = builder.body(Full::new(req.body))?;
        let res: hyper::Response<Incoming> = self.inner.request(req).await?;

        let (parts, body) = res.into_parts();
        let head_bytes = response_head_bytes(parts.version, parts.status, &parts.headers);
        let body = body.collect().await?.to_bytes();

        Ok(HttpResponse {
            status: parts.status.as_u16(),
            bytes_sent,
            bytes_received: head_bytes.saturating_add(body.len() as u64),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn non_http_urls_fail_before_connecting() {
        let client = HttpClient::default();

        let https = client.request(HttpRequest::get("https://localhost/")).await;
        assert!(matches!(https, Err(Error::OnlyHttpSupported(_))));

        let garbage = client.request(HttpRequest::get("not a url")).await;
        assert!(matches!(garbage, Err(Error::InvalidUrl(_))));
    }
}
