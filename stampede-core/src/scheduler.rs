use std::collections::HashSet;
use std::time::Duration;
use tokio::task::{Id, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::config::SchedulerOptions;
use crate::http::Transport;
use crate::schedule::RampingSchedule;
use crate::vu::{VuShared, run_vu};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerSummary {
    pub vus_started: u64,
    pub vus_max: u64,
    /// Loops still running when the graceful-stop window closed.
    pub interrupted: u64,
    /// The run token fired before the schedule ended.
    pub stopped_early: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepResult {
    pub target: u64,
    pub spawned: u64,
    pub retired: u64,
}

/// Reconciles running VU loops with the schedule's target at every control tick.
pub struct RampScheduler<T: Transport> {
    schedule: RampingSchedule,
    options: SchedulerOptions,
    max_vus: u64,
    shared: VuShared<T>,
    cancel: CancellationToken,
    /// Admitted loops with their stop tokens, oldest first.
    admitted: Vec<(Id, CancellationToken)>,
    /// Retired loops still finishing their in-flight iteration.
    retiring: HashSet<Id>,
    tasks: JoinSet<u64>,
    next_vu_id: u64,
    summary: SchedulerSummary,
}

impl<T: Transport> RampScheduler<T> {
    pub fn new(
        schedule: RampingSchedule,
        options: SchedulerOptions,
        shared: VuShared<T>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        options.validate()?;
        let max_vus = options.max_vus.unwrap_or_else(|| schedule.max_target());

        Ok(Self {
            schedule,
            options,
            max_vus,
            shared,
            cancel,
            admitted: Vec::new(),
            retiring: HashSet::new(),
            tasks: JoinSet::new(),
            next_vu_id: 0,
            summary: SchedulerSummary::default(),
        })
    }

    /// Loops admitted at the current target.
    pub fn active(&self) -> u64 {
        self.admitted.len() as u64
    }

    /// Admitted plus retiring loops, i.e. everything that may still send a request.
    pub fn running(&self) -> u64 {
        (self.admitted.len() + self.retiring.len()) as u64
    }

    /// Brings the number of admitted loops to the target at `elapsed`. Extra loops are
    /// retired newest first and finish their current iteration. New loops are only spawned
    /// while the running count, retiring loops included, is below the target.
    pub fn step(&mut self, elapsed: Duration) -> StepResult {
        let target = if self.schedule.is_done(elapsed) || self.cancel.is_cancelled() {
            0
        } else {
            self.schedule.target_at(elapsed).min(self.max_vus)
        };

        let mut result = StepResult {
            target,
            ..StepResult::default()
        };

        while self.running() < target {
            let stop = self.cancel.child_token();
            let vu_id = self.next_vu_id;
            self.next_vu_id += 1;

            let id = self
                .tasks
                .spawn(run_vu(self.shared.clone(), vu_id, stop.clone()))
                .id();
            self.admitted.push((id, stop));
            result.spawned += 1;
        }

        while self.active() > target {
            if let Some((id, stop)) = self.admitted.pop() {
                stop.cancel();
                self.retiring.insert(id);
                result.retired += 1;
            }
        }

        if result.spawned > 0 || result.retired > 0 {
            tracing::debug!(
                target_vus = target,
                spawned = result.spawned,
                retired = result.retired,
                "vus adjusted"
            );
        }

        self.summary.vus_started += result.spawned;
        self.summary.vus_max = self.summary.vus_max.max(self.running());
        self.shared.aggregator.set_vus(self.running());
        result
    }

    /// Collects loops that already exited. Panicked loops are returned as errors.
    fn reap(&mut self) -> Result<()> {
        while let Some(res) = self.tasks.try_join_next_with_id() {
            let (id, _) = res?;
            if !self.retiring.remove(&id) {
                self.admitted.retain(|(admitted, _)| *admitted != id);
            }
        }
        Ok(())
    }

    pub async fn run(mut self) -> Result<SchedulerSummary> {
        let started = Instant::now();
        let mut ticker = tokio::time::interval(self.options.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut stage = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.cancel.cancelled() => {
                    self.summary.stopped_early = true;
                    break;
                }
            }

            let elapsed = started.elapsed();
            if self.schedule.is_done(elapsed) {
                break;
            }

            let current = self.schedule.stage_snapshot_at(elapsed).map(|s| s.index);
            if current != stage {
                if let Some(index) = current {
                    tracing::info!(
                        stage = index + 1,
                        of = self.schedule.stages().len(),
                        "stage started"
                    );
                }
                stage = current;
            }

            if let Err(err) = self.reap() {
                self.shutdown_now().await;
                return Err(err);
            }
            self.step(elapsed);
        }

        self.drain().await
    }

    /// Cancels every loop and waits up to `graceful_stop` for them to finish their current
    /// iteration. Stragglers are aborted and counted as interrupted.
    async fn drain(mut self) -> Result<SchedulerSummary> {
        for (_, stop) in self.admitted.drain(..) {
            stop.cancel();
        }
        self.retiring.clear();
        self.shared.aggregator.set_vus(0);

        let graceful_stop = self.options.graceful_stop;
        let mut failure = None;
        let drained = tokio::time::timeout(graceful_stop, async {
            while let Some(res) = self.tasks.join_next().await {
                if let Err(err) = res
                    && failure.is_none()
                {
                    failure = Some(err);
                }
            }
        })
        .await;

        if drained.is_err() {
            let interrupted = self.tasks.len() as u64;
            tracing::warn!(interrupted, ?graceful_stop, "graceful stop expired, aborting vus");
            self.summary.interrupted = interrupted;
            self.shared.aggregator.record_interrupted(interrupted);
            self.shutdown_now().await;
        }

        if let Some(err) = failure {
            return Err(err.into());
        }
        Ok(self.summary)
    }

    async fn shutdown_now(&mut self) {
        self.cancel.cancel();
        self.tasks.abort_all();
        while self.tasks.join_next().await.is_some() {}
        self.admitted.clear();
        self.retiring.clear();
        self.shared.aggregator.set_vus(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::MetricsAggregator;
    use crate::config::Stage;
    use crate::http::{HttpRequest, HttpResponse};
    use crate::scenario::{ExpectedStatuses, RequestTemplate, Scenario};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Sleepy(Duration);

    impl Transport for Sleepy {
        async fn send(&self, req: HttpRequest) -> crate::http::Result<HttpResponse> {
            tokio::time::sleep(self.0).await;
            Ok(HttpResponse {
                status: 200,
                body: req.body,
                bytes_sent: 0,
                bytes_received: 0,
            })
        }
    }

    fn scheduler(
        stages: &[(u64, u64)],
        request_time: Duration,
        options: SchedulerOptions,
    ) -> (RampScheduler<Sleepy>, Arc<MetricsAggregator>, CancellationToken) {
        let stages = stages
            .iter()
            .map(|(d, t)| Stage::new(Duration::from_secs(*d), *t))
            .collect();
        let schedule = RampingSchedule::new(stages).unwrap_or_else(|e| panic!("{e}"));
        let scenario = Scenario::builder("sched", RequestTemplate::get("http://localhost/"))
            .build()
            .unwrap_or_else(|e| panic!("{e}"));
        let aggregator = Arc::new(
            MetricsAggregator::new(ExpectedStatuses::default()).unwrap_or_else(|e| panic!("{e}")),
        );
        let shared = VuShared {
            scenario: Arc::new(scenario),
            transport: Arc::new(Sleepy(request_time)),
            aggregator: aggregator.clone(),
        };
        let cancel = CancellationToken::new();
        let s = RampScheduler::new(schedule, options, shared, cancel.clone())
            .unwrap_or_else(|e| panic!("{e}"));
        (s, aggregator, cancel)
    }

    #[tokio::test(start_paused = true)]
    async fn step_spawns_and_retires_lifo() {
        let (mut s, agg, _cancel) =
            scheduler(&[(10, 4), (10, 0)], Duration::from_millis(50), SchedulerOptions::default());

        assert_eq!(s.step(Duration::ZERO).spawned, 0);
        let r = s.step(Duration::from_secs(5));
        assert_eq!((r.target, r.spawned, r.retired), (2, 2, 0));
        let r = s.step(Duration::from_secs(10));
        assert_eq!((r.target, r.spawned, r.retired), (4, 2, 0));

        let newest = s.admitted.last().map(|(_, t)| t.clone());
        let newest = newest.unwrap_or_else(|| panic!("no vus"));
        let oldest = s.admitted.first().map(|(_, t)| t.clone());
        let oldest = oldest.unwrap_or_else(|| panic!("no vus"));
        let r = s.step(Duration::from_secs(15));
        assert_eq!((r.target, r.retired), (2, 2));
        assert!(newest.is_cancelled());
        assert!(!oldest.is_cancelled());

        let r = s.step(Duration::from_secs(20));
        assert_eq!((r.target, r.spawned), (0, 0));
        assert_eq!(s.active(), 0);
        assert_eq!(s.running(), 4);
        assert_eq!(agg.snapshot().vus_max, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn max_vus_caps_target() {
        let options = SchedulerOptions {
            max_vus: Some(3),
            ..SchedulerOptions::default()
        };
        let (mut s, _agg, _cancel) = scheduler(&[(1, 10)], Duration::from_millis(50), options);
        let r = s.step(Duration::from_millis(900));
        assert_eq!((r.target, r.spawned), (3, 3));
    }

    #[tokio::test(start_paused = true)]
    async fn run_tracks_schedule_and_drains() {
        let (s, agg, _cancel) =
            scheduler(&[(5, 2), (5, 0)], Duration::from_millis(100), SchedulerOptions::default());
        let summary = s.run().await.unwrap_or_else(|e| panic!("{e}"));

        assert!(!summary.stopped_early);
        assert_eq!(summary.vus_max, 2);
        assert_eq!(summary.interrupted, 0);

        // Concurrency integral is 10 VU-seconds at 100ms per request.
        let total = agg.snapshot().total_requests;
        assert!((80..=120).contains(&total), "total requests {total}");
        assert_eq!(agg.snapshot().vus, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_stop_interrupts_slow_loops() {
        let options = SchedulerOptions {
            graceful_stop: Duration::from_secs(1),
            ..SchedulerOptions::default()
        };
        let (s, agg, _cancel) = scheduler(&[(2, 2)], Duration::from_secs(30), options);
        let summary = s.run().await.unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(summary.interrupted, 2);
        let snapshot = agg.snapshot();
        assert_eq!(snapshot.interrupted_iterations, 2);
        assert_eq!(snapshot.total_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_run_early() {
        let (s, agg, cancel) =
            scheduler(&[(60, 2)], Duration::from_millis(100), SchedulerOptions::default());
        let run = tokio::spawn(s.run());
        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();

        let summary = run
            .await
            .unwrap_or_else(|e| panic!("{e}"))
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(summary.stopped_early);
        assert!(agg.elapsed() < Duration::from_secs(10));
    }

    #[derive(Default)]
    struct InFlight {
        current: AtomicU64,
        peak: AtomicU64,
    }

    impl Transport for InFlight {
        async fn send(&self, req: HttpRequest) -> crate::http::Result<HttpResponse> {
            let now = self.current.fetch_add(1, Ordering::Relaxed) + 1;
            self.peak.fetch_max(now, Ordering::Relaxed);
            tokio::time::sleep(Duration::from_secs(2)).await;
            self.current.fetch_sub(1, Ordering::Relaxed);
            Ok(HttpResponse {
                status: 200,
                body: req.body,
                bytes_sent: 0,
                bytes_received: 0,
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retiring_loops_hold_back_a_quick_ramp_up() {
        // Drop to 1 VU, then back to 4 while the retired loops are mid-request.
        let stages = [(0, 4), (1000, 4), (0, 1), (500, 1), (0, 4), (3000, 4)]
            .iter()
            .map(|(ms, t)| Stage::new(Duration::from_millis(*ms), *t))
            .collect();
        let schedule = RampingSchedule::new(stages).unwrap_or_else(|e| panic!("{e}"));
        let scenario = Scenario::builder("ramp-again", RequestTemplate::get("http://localhost/"))
            .build()
            .unwrap_or_else(|e| panic!("{e}"));
        let aggregator = Arc::new(
            MetricsAggregator::new(ExpectedStatuses::default()).unwrap_or_else(|e| panic!("{e}")),
        );
        let transport = Arc::new(InFlight::default());
        let shared = VuShared {
            scenario: Arc::new(scenario),
            transport: transport.clone(),
            aggregator: aggregator.clone(),
        };
        let s = RampScheduler::new(
            schedule,
            SchedulerOptions::default(),
            shared,
            CancellationToken::new(),
        )
        .unwrap_or_else(|e| panic!("{e}"));

        let summary = s.run().await.unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(transport.peak.load(Ordering::Relaxed), 4);
        assert_eq!(summary.vus_max, 4);
        assert_eq!(aggregator.snapshot().vus_max, 4);
        assert_eq!(summary.interrupted, 0);
    }
}
