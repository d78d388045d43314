//! HTTP/1.1 wire-size estimates for `data_sent` and `data_received`.

use super::has_header;

/// Request line, headers, blank line and body. `host` and `content-length` are counted
/// when the client adds them implicitly.
pub(super) fn request_bytes(
    method: &http::Method,
    uri: &hyper::Uri,
    headers: &[(String, String)],
    implicit_host: Option<&str>,
    body_len: u64,
) -> u64 {
    let path = uri.path_and_query().map_or("/", |p| p.as_str());
    // "METHOD SP path SP HTTP/1.1 CRLF"
    let mut bytes = line_bytes(&[method.as_str(), path, "HTTP/1.1"]);

    for (k, v) in headers {
        bytes = bytes.saturating_add(header_bytes(k.as_bytes(), v.as_bytes()));
    }
    if let Some(host) = implicit_host.filter(|_| !has_header(headers, "host")) {
        bytes = bytes.saturating_add(header_bytes(b"host", host.as_bytes()));
    }
    if body_len != 0 && !has_header(headers, "content-length") {
        let len = body_len.to_string();
        bytes = bytes.saturating_add(header_bytes(b"content-length", len.as_bytes()));
    }

    bytes.saturating_add(2).saturating_add(body_len)
}

/// Status line, headers and blank line. The reason phrase is not counted.
pub(super) fn response_head_bytes(
    version: http::Version,
    status: http::StatusCode,
    headers: &http::HeaderMap,
) -> u64 {
    let version = match version {
        http::Version::HTTP_10 => "HTTP/1.0",
        http::Version::HTTP_2 => "HTTP/2",
        http::Version::HTTP_3 => "HTTP/3",
        _ => "HTTP/1.1",
    };

    headers
        .iter()
        .map(|(name, value)| header_bytes(name.as_str().as_bytes(), value.as_bytes()))
        .fold(line_bytes(&[version, status.as_str()]), u64::saturating_add)
        .saturating_add(2)
}

/// Space-separated parts followed by CRLF.
fn line_bytes(parts: &[&str]) -> u64 {
    let text: usize = parts.iter().map(|p| p.len()).sum();
    (text + parts.len().saturating_sub(1) + 2) as u64
}

/// "name: value\r\n"
fn header_bytes(name: &[u8], value: &[u8]) -> u64 {
    (name.len() + 2 + value.len() + 2) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn request_counts_implicit_headers() {
        let uri: hyper::Uri = "http://localhost:3000/process-meeting"
            .parse()
            .unwrap_or_else(|e| panic!("{e}"));
        let headers = headers(&[("content-type", "application/json")]);

        // "POST /process-meeting HTTP/1.1\r\n" = 32
        // "content-type: application/json\r\n" = 32
        // "host: localhost:3000\r\n" = 22
        // "content-length: 2\r\n" = 19
        // "\r\n" + body = 4
        let bytes =
            request_bytes(&http::Method::POST, &uri, &headers, Some("localhost:3000"), 2);
        assert_eq!(bytes, 32 + 32 + 22 + 19 + 4);
    }

    #[test]
    fn explicit_host_is_not_counted_twice() {
        let uri: hyper::Uri = "http://h/?q=1".parse().unwrap_or_else(|e| panic!("{e}"));
        let headers = headers(&[("Host", "h")]);

        // "GET /?q=1 HTTP/1.1\r\n" = 20, "Host: h\r\n" = 9, "\r\n" = 2
        assert_eq!(request_bytes(&http::Method::GET, &uri, &headers, Some("h"), 0), 31);
    }

    #[test]
    fn response_head_counts_status_line_and_headers() {
        let mut headers = http::HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("text/plain"),
        );
        // "HTTP/1.1 200\r\n" = 14, "content-type: text/plain\r\n" = 26, "\r\n" = 2
        let bytes = response_head_bytes(http::Version::HTTP_11, http::StatusCode::OK, &headers);
        assert_eq!(bytes, 42);
    }
}
