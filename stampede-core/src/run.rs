use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::aggregator::MetricsAggregator;
use crate::config::{SchedulerOptions, Stage};
use crate::http::{HttpClient, Transport};
use crate::progress::{ProgressFn, ProgressTracker};
use crate::schedule::RampingSchedule;
use crate::scenario::Scenario;
use crate::scheduler::{RampScheduler, SchedulerSummary};
use crate::snapshot::AggregateSnapshot;
use crate::thresholds::{ThresholdSet, ThresholdSpec, compile_thresholds};
use crate::thresholds_eval::{RunVerdict, ThresholdFailure, abort_failure, evaluate_thresholds};
use crate::vu::VuShared;

/// Everything needed to run a load test, before validation.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub scenario: Scenario,
    pub stages: Vec<Stage>,
    pub thresholds: Vec<ThresholdSet>,
    pub options: SchedulerOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AbortReason {
    /// An `abort_on_fail` threshold failed during the run.
    Threshold(ThresholdFailure),
    /// The run was stopped through [`RunHandle::stop`].
    Stopped,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub snapshot: AggregateSnapshot,
    pub verdict: RunVerdict,
    pub aborted: Option<AbortReason>,
    pub duration: Duration,
    pub scheduler: SchedulerSummary,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.verdict.passed
    }
}

/// Lets a host stop a run early. The run still produces a report.
#[derive(Debug, Clone)]
pub struct RunHandle {
    cancel: CancellationToken,
}

impl RunHandle {
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A validated [`RunPlan`]. Every configuration error surfaces here, before any request
/// is sent.
#[derive(Debug)]
pub struct PreparedRun {
    scenario: Arc<Scenario>,
    schedule: RampingSchedule,
    thresholds: Vec<ThresholdSpec>,
    options: SchedulerOptions,
    aggregator: MetricsAggregator,
    cancel: CancellationToken,
}

impl PreparedRun {
    pub fn prepare(plan: RunPlan) -> Result<Self> {
        let schedule = RampingSchedule::new(plan.stages)?;
        plan.options.validate()?;

        let aggregator = MetricsAggregator::new(plan.scenario.expected_statuses.clone())?;
        let thresholds = compile_thresholds(
            &plan.thresholds,
            |name| aggregator.metric_kind(name),
            plan.scenario.checks.names(),
        )?;

        Ok(Self {
            scenario: Arc::new(plan.scenario),
            schedule,
            thresholds,
            options: plan.options,
            aggregator,
            cancel: CancellationToken::new(),
        })
    }

    pub fn handle(&self) -> RunHandle {
        RunHandle {
            cancel: self.cancel.clone(),
        }
    }

    pub fn schedule(&self) -> &RampingSchedule {
        &self.schedule
    }

    pub fn thresholds(&self) -> &[ThresholdSpec] {
        &self.thresholds
    }

    /// Runs with the default hyper client.
    pub async fn run_http(self, progress: Option<ProgressFn>) -> Result<RunReport> {
        self.run(Arc::new(HttpClient::default()), progress).await
    }

    pub async fn run<T: Transport>(
        self,
        transport: Arc<T>,
        progress: Option<ProgressFn>,
    ) -> Result<RunReport> {
        let Self {
            scenario,
            schedule,
            thresholds,
            options,
            mut aggregator,
            cancel,
        } = self;

        aggregator.restart_clock();
        let aggregator = Arc::new(aggregator);

        tracing::info!(
            scenario = %scenario.name,
            url = %scenario.request.url,
            stages = schedule.stages().len(),
            duration = ?schedule.total_duration(),
            thresholds = thresholds.len(),
            "run started"
        );

        let shared = VuShared {
            scenario: scenario.clone(),
            transport,
            aggregator: aggregator.clone(),
        };
        let scheduler =
            RampScheduler::new(schedule.clone(), options.clone(), shared, cancel.clone())?;

        let monitors = CancellationToken::new();
        let watchdog = thresholds.iter().any(|t| t.abort_on_fail).then(|| {
            spawn_abort_watchdog(
                thresholds.clone(),
                aggregator.clone(),
                options.threshold_eval_interval,
                cancel.clone(),
                monitors.clone(),
            )
        });
        let reporter = progress.map(|progress| {
            spawn_progress(
                ProgressTracker::new(scenario.name.clone()),
                schedule.clone(),
                aggregator.clone(),
                options.progress_interval,
                progress,
                monitors.clone(),
            )
        });

        let summary = scheduler.run().await;
        monitors.cancel();

        let abort = match watchdog {
            Some(task) => task.await?,
            None => None,
        };
        if let Some(task) = reporter {
            task.await?;
        }
        let summary = summary?;

        let snapshot = aggregator.snapshot();
        let verdict = evaluate_thresholds(&snapshot, &thresholds);
        for failure in &verdict.failed_thresholds {
            tracing::warn!(
                metric = %failure.metric,
                expression = %failure.expression,
                observed = ?failure.observed,
                "threshold failed"
            );
        }

        let aborted = abort
            .map(AbortReason::Threshold)
            .or_else(|| summary.stopped_early.then_some(AbortReason::Stopped));

        tracing::info!(
            passed = verdict.passed,
            requests = snapshot.total_requests,
            iterations = snapshot.iterations,
            aborted = aborted.is_some(),
            "run finished"
        );

        Ok(RunReport {
            duration: snapshot.elapsed,
            snapshot,
            verdict,
            aborted,
            scheduler: summary,
        })
    }
}

/// Validates `plan` and runs it against `transport`.
pub async fn run<T: Transport>(
    plan: RunPlan,
    transport: Arc<T>,
    progress: Option<ProgressFn>,
) -> Result<RunReport> {
    PreparedRun::prepare(plan)?.run(transport, progress).await
}

fn spawn_abort_watchdog(
    thresholds: Vec<ThresholdSpec>,
    aggregator: Arc<MetricsAggregator>,
    interval: Duration,
    run: CancellationToken,
    stop: CancellationToken,
) -> JoinHandle<Option<ThresholdFailure>> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = stop.cancelled() => return None,
            }

            let snapshot = aggregator.snapshot();
            if let Some(failure) = abort_failure(&snapshot, &thresholds) {
                tracing::warn!(
                    metric = %failure.metric,
                    expression = %failure.expression,
                    observed = ?failure.observed,
                    "threshold failed, aborting run"
                );
                run.cancel();
                return Some(failure);
            }
        }
    })
}

fn spawn_progress(
    mut tracker: ProgressTracker,
    schedule: RampingSchedule,
    aggregator: Arc<MetricsAggregator>,
    interval: Duration,
    progress: ProgressFn,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = stop.cancelled() => return,
            }
            progress(tracker.next(&schedule, &aggregator));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::checks::Check;
    use crate::http::{HttpRequest, HttpResponse};
    use crate::scenario::RequestTemplate;
    use crate::thresholds::ThresholdRule;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Fixed {
        status: u16,
        delay: Duration,
    }

    impl Transport for Fixed {
        async fn send(&self, _req: HttpRequest) -> crate::http::Result<HttpResponse> {
            tokio::time::sleep(self.delay).await;
            Ok(HttpResponse {
                status: self.status,
                body: bytes::Bytes::from_static(br#"{"success":true}"#),
                bytes_sent: 10,
                bytes_received: 20,
            })
        }
    }

    fn plan(stages: &[(u64, u64)], thresholds: Vec<ThresholdSet>) -> RunPlan {
        let scenario = Scenario::builder("unit", RequestTemplate::get("http://localhost/"))
            .check(Check::status("status is 200", 200))
            .build()
            .unwrap_or_else(|e| panic!("{e}"));
        RunPlan {
            scenario,
            stages: stages
                .iter()
                .map(|(d, t)| Stage::new(Duration::from_secs(*d), *t))
                .collect(),
            thresholds,
            options: SchedulerOptions::default(),
        }
    }

    #[test]
    fn prepare_rejects_bad_configuration() {
        let err = PreparedRun::prepare(plan(&[], Vec::new()));
        assert!(matches!(err, Err(Error::InvalidStages)));

        let err = PreparedRun::prepare(plan(
            &[(5, 1)],
            vec![ThresholdSet::new("pass-rate", ["rate>0.95"])],
        ));
        assert!(matches!(err, Err(ref e) if e.is_config()));

        let err = PreparedRun::prepare(plan(
            &[(5, 1)],
            vec![ThresholdSet::new("checks{check:missing}", ["rate>0.95"])],
        ));
        assert!(matches!(err, Err(Error::UnknownThresholdMetric(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn run_produces_verdict_and_progress() {
        let ticks = Arc::new(AtomicU64::new(0));
        let seen = ticks.clone();
        let progress: ProgressFn = Arc::new(move |_update| {
            seen.fetch_add(1, Ordering::Relaxed);
        });

        let report = run(
            plan(
                &[(2, 2), (2, 0)],
                vec![
                    ThresholdSet::new("checks", ["rate>0.95"]),
                    ThresholdSet::new("http_req_duration", ["p(95)<15000"]),
                ],
            ),
            Arc::new(Fixed {
                status: 200,
                delay: Duration::from_millis(100),
            }),
            Some(progress),
        )
        .await
        .unwrap_or_else(|e| panic!("{e}"));

        assert!(report.passed(), "{:?}", report.verdict);
        assert!(report.aborted.is_none());
        assert!(report.snapshot.total_requests > 0);
        assert_eq!(report.snapshot.bytes_sent, report.snapshot.total_requests * 10);
        assert!(ticks.load(Ordering::Relaxed) >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_on_fail_stops_the_run() {
        let thresholds = vec![ThresholdSet {
            metric: "checks".to_string(),
            rules: vec![ThresholdRule::new("rate>0.95").abort_on_fail(None)],
        }];
        let report = run(
            plan(&[(600, 2)], thresholds),
            Arc::new(Fixed {
                status: 500,
                delay: Duration::from_millis(50),
            }),
            None,
        )
        .await
        .unwrap_or_else(|e| panic!("{e}"));

        assert!(!report.passed());
        assert!(matches!(report.aborted, Some(AbortReason::Threshold(_))));
        assert!(report.duration < Duration::from_secs(60));
        assert!(report.scheduler.stopped_early);
    }

    #[tokio::test(start_paused = true)]
    async fn handle_stop_ends_run_with_verdict() {
        let prepared = PreparedRun::prepare(plan(&[(600, 1)], Vec::new()))
            .unwrap_or_else(|e| panic!("{e}"));
        let handle = prepared.handle();

        let task = tokio::spawn(prepared.run(
            Arc::new(Fixed {
                status: 200,
                delay: Duration::from_millis(10),
            }),
            None,
        ));
        tokio::time::sleep(Duration::from_secs(3)).await;
        handle.stop();

        let report = task
            .await
            .unwrap_or_else(|e| panic!("{e}"))
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(handle.is_stopped());
        assert_eq!(report.aborted, Some(AbortReason::Stopped));
        assert!(report.passed());
    }
}
