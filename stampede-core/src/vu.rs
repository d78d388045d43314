use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::aggregator::MetricsAggregator;
use crate::executor::execute;
use crate::http::Transport;
use crate::scenario::{IterationContext, Scenario};

/// Everything a VU loop needs, shared by all loops of a run.
#[derive(Debug)]
pub struct VuShared<T> {
    pub scenario: Arc<Scenario>,
    pub transport: Arc<T>,
    pub aggregator: Arc<MetricsAggregator>,
}

impl<T> Clone for VuShared<T> {
    fn clone(&self) -> Self {
        Self {
            scenario: self.scenario.clone(),
            transport: self.transport.clone(),
            aggregator: self.aggregator.clone(),
        }
    }
}

/// Runs one scenario iteration: build payload, send, check, record.
pub async fn run_iteration<T: Transport>(shared: &VuShared<T>, vu_id: u64, iteration: u64) {
    let started = Instant::now();
    let scenario = &shared.scenario;

    let req = scenario.request_for(&IterationContext {
        vu_id,
        iteration,
        scenario: &scenario.name,
    });
    let outcome = execute(&*shared.transport, req, scenario.timeout).await;
    let checks = scenario.checks.evaluate(&outcome);

    shared.aggregator.record(&outcome, &checks);
    shared.aggregator.record_iteration(started.elapsed());
}

/// Iterates until `stop` fires. The token is only checked between iterations (and during
/// pacing sleeps), so an in-flight request always completes. Returns the iteration count.
pub async fn run_vu<T: Transport>(shared: VuShared<T>, vu_id: u64, stop: CancellationToken) -> u64 {
    tracing::debug!(vu_id, "vu started");

    let mut iteration: u64 = 0;
    while !stop.is_cancelled() {
        run_iteration(&shared, vu_id, iteration).await;
        iteration += 1;

        if let Some(pacing) = shared.scenario.pacing {
            tokio::select! {
                _ = tokio::time::sleep(pacing) => {}
                _ = stop.cancelled() => break,
            }
        }
    }

    tracing::debug!(vu_id, iterations = iteration, "vu stopped");
    iteration
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::Check;
    use crate::http::{HttpRequest, HttpResponse, Result};
    use crate::scenario::{ExpectedStatuses, RequestTemplate};
    use bytes::Bytes;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Counting {
        calls: AtomicU64,
    }

    impl Transport for Counting {
        async fn send(&self, req: HttpRequest) -> Result<HttpResponse> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(HttpResponse {
                status: 200,
                body: req.body,
                bytes_sent: 0,
                bytes_received: 0,
            })
        }
    }

    fn shared(pacing: Option<Duration>) -> VuShared<Counting> {
        let mut builder = Scenario::builder("vu", RequestTemplate::get("http://localhost/"))
            .check(Check::status("status is 200", 200));
        if let Some(p) = pacing {
            builder = builder.pacing(p);
        }
        let scenario = builder.build().unwrap_or_else(|e| panic!("{e}"));
        let aggregator = MetricsAggregator::new(ExpectedStatuses::default())
            .unwrap_or_else(|e| panic!("{e}"));
        VuShared {
            scenario: Arc::new(scenario),
            transport: Arc::new(Counting::default()),
            aggregator: Arc::new(aggregator),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stop_lets_in_flight_iteration_finish() {
        let shared = shared(None);
        let stop = CancellationToken::new();
        let task = tokio::spawn(run_vu(shared.clone(), 0, stop.clone()));

        // Cancel mid-request; the request still completes and is recorded.
        tokio::time::sleep(Duration::from_millis(250)).await;
        stop.cancel();
        let iterations = task.await.unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(iterations, 3);
        let snapshot = shared.aggregator.snapshot();
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.iterations, 3);
        assert_eq!(shared.transport.calls.load(Ordering::Relaxed), 3);
        assert_eq!(snapshot.checks_rate(), Some(1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_sleep_is_interrupted_by_stop() {
        let shared = shared(Some(Duration::from_secs(60)));
        let stop = CancellationToken::new();
        let task = tokio::spawn(run_vu(shared.clone(), 0, stop.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        stop.cancel();
        let iterations = task.await.unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(iterations, 1);
    }

    #[tokio::test]
    async fn cancelled_before_start_runs_nothing() {
        let shared = shared(None);
        let stop = CancellationToken::new();
        stop.cancel();
        assert_eq!(run_vu(shared.clone(), 0, stop).await, 0);
        assert_eq!(shared.aggregator.snapshot().total_requests, 0);
    }
}
