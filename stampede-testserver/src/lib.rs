use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{Duration, sleep};

pub const PATH_HELLO: &str = "/hello";
pub const PATH_SLOW: &str = "/slow";
pub const PATH_PROCESS_MEETING: &str = "/process-meeting";
pub const PATH_STATUS: &str = "/status/{code}";
pub const PATH_NOT_JSON: &str = "/not-json";

const DEFAULT_SLOW_MS: u64 = 50;

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    in_flight: Arc<AtomicU64>,
    peak_in_flight: Arc<AtomicU64>,
    meeting_chars: Arc<AtomicU64>,
}

/// Marks one request as in flight until dropped.
struct InFlight(TestServerStats);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

impl TestServerStats {
    fn enter(&self) -> InFlight {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        let now = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::Relaxed);
        InFlight(self.clone())
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Highest number of requests handled concurrently.
    pub fn peak_in_flight(&self) -> u64 {
        self.peak_in_flight.load(Ordering::Relaxed)
    }

    /// Total characters of `text` received by `/process-meeting`.
    pub fn meeting_chars(&self) -> u64 {
        self.meeting_chars.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct TestServerUrls {
    pub base_url: String,
    pub hello: String,
    pub slow: String,
    pub process_meeting: String,
    pub not_json: String,
}

impl TestServerUrls {
    pub fn new(base_url: String) -> Self {
        Self {
            hello: format!("{base_url}{PATH_HELLO}"),
            slow: format!("{base_url}{PATH_SLOW}"),
            process_meeting: format!("{base_url}{PATH_PROCESS_MEETING}"),
            not_json: format!("{base_url}{PATH_NOT_JSON}"),
            base_url,
        }
    }

    pub fn slow_ms(&self, ms: u64) -> String {
        format!("{}?ms={ms}", self.slow)
    }

    pub fn status(&self, code: u16) -> String {
        format!("{}/status/{code}", self.base_url)
    }
}

#[derive(Debug, Deserialize)]
struct MeetingRequest {
    text: String,
}

async fn handle_process_meeting(
    State(stats): State<TestServerStats>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> (StatusCode, Json<serde_json::Value>) {
    let _guard = stats.enter();

    let req: MeetingRequest = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "success": false, "error": err.to_string() })),
            );
        }
    };
    if let Some(ms) = query.get("ms").and_then(|v| v.parse().ok()) {
        sleep(Duration::from_millis(ms)).await;
    }

    let chars = req.text.chars().count() as u64;
    stats.meeting_chars.fetch_add(chars, Ordering::Relaxed);
    (
        StatusCode::OK,
        Json(json!({ "success": true, "chars": chars })),
    )
}

async fn handle_hello(State(stats): State<TestServerStats>) -> &'static str {
    let _guard = stats.enter();
    "Hello World!"
}

async fn handle_slow(
    State(stats): State<TestServerStats>,
    Query(query): Query<HashMap<String, String>>,
) -> &'static str {
    let _guard = stats.enter();
    let ms = query
        .get("ms")
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_SLOW_MS);
    sleep(Duration::from_millis(ms)).await;
    "slow"
}

async fn handle_status(State(stats): State<TestServerStats>, Path(code): Path<u16>) -> StatusCode {
    let _guard = stats.enter();
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

async fn handle_not_json(State(stats): State<TestServerStats>) -> &'static str {
    let _guard = stats.enter();
    "this is not json"
}

pub fn router(stats: TestServerStats) -> Router {
    Router::new()
        .route(PATH_HELLO, get(handle_hello))
        .route(PATH_SLOW, get(handle_slow))
        .route(PATH_PROCESS_MEETING, post(handle_process_meeting))
        .route(PATH_STATUS, get(handle_status))
        .route(PATH_NOT_JSON, get(handle_not_json))
        .with_state(stats)
}

pub struct TestServer {
    addr: SocketAddr,
    urls: TestServerUrls,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let stats = TestServerStats::default();
        let app = router(stats.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            urls: TestServerUrls::new(format!("http://{addr}")),
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.urls.base_url
    }

    pub fn urls(&self) -> &TestServerUrls {
        &self.urls
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
