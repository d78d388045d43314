use std::time::Duration;

use crate::config::Stage;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSnapshot {
    pub index: usize,
    pub count: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

/// Piecewise-linear VU target over a list of stages, starting from 0 at `t = 0`.
#[derive(Debug, Clone)]
pub struct RampingSchedule {
    stages: Vec<Stage>,
    cumulative_ends: Vec<Duration>,
}

impl RampingSchedule {
    pub fn new(stages: Vec<Stage>) -> Result<Self> {
        if stages.is_empty() {
            return Err(Error::InvalidStages);
        }

        let mut cumulative_ends = Vec::with_capacity(stages.len());
        let mut acc = Duration::ZERO;
        for s in &stages {
            acc = acc.saturating_add(s.duration);
            cumulative_ends.push(acc);
        }
        if acc.is_zero() {
            return Err(Error::ZeroDurationStages);
        }

        Ok(Self {
            stages,
            cumulative_ends,
        })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn total_duration(&self) -> Duration {
        self.cumulative_ends
            .last()
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_done(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }

    pub fn max_target(&self) -> u64 {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }

    /// Index of the stage active at `elapsed`. Zero-length stages are skipped, which makes
    /// them take effect immediately.
    fn stage_index(&self, elapsed: Duration) -> usize {
        self.cumulative_ends.partition_point(|end| *end <= elapsed)
    }

    fn bounds(&self, idx: usize) -> (Duration, Duration, u64, u64) {
        let start = if idx == 0 {
            Duration::ZERO
        } else {
            self.cumulative_ends[idx - 1]
        };
        let start_target = if idx == 0 {
            0
        } else {
            self.stages[idx - 1].target
        };
        (
            start,
            self.cumulative_ends[idx],
            start_target,
            self.stages[idx].target,
        )
    }

    /// Exact (fractional) target at `elapsed`.
    pub fn exact_target_at(&self, elapsed: Duration) -> f64 {
        let idx = self.stage_index(elapsed);
        if idx >= self.stages.len() {
            return 0.0;
        }

        let (start, end, from, to) = self.bounds(idx);
        let span = end.saturating_sub(start).as_secs_f64();
        if span <= 0.0 {
            return to as f64;
        }
        let frac = elapsed.saturating_sub(start).as_secs_f64() / span;
        from as f64 + (to as f64 - from as f64) * frac
    }

    /// Target VU count at `elapsed`, rounded to the nearest integer. 0 at or after the end.
    pub fn target_at(&self, elapsed: Duration) -> u64 {
        let idx = self.stage_index(elapsed);
        if idx >= self.stages.len() {
            return 0;
        }

        let (start, end, from, to) = self.bounds(idx);
        let den = end.saturating_sub(start).as_nanos() as i128;
        if den == 0 {
            return to;
        }
        let num = elapsed.saturating_sub(start).as_nanos() as i128;

        let from_i = from as i128;
        let delta = to as i128 - from_i;

        // Round half away from zero: (2*delta*num +- den) / (2*den).
        let scaled = delta.saturating_mul(num).saturating_mul(2);
        let step = if scaled >= 0 {
            (scaled + den) / (2 * den)
        } else {
            (scaled - den) / (2 * den)
        };

        (from_i + step).clamp(0, u64::MAX as i128) as u64
    }

    pub fn stage_snapshot_at(&self, elapsed: Duration) -> Option<StageSnapshot> {
        let total = self.total_duration();
        let clamped = elapsed.min(total);

        let idx = self.stage_index(clamped).min(self.stages.len().saturating_sub(1));
        let (start, end, start_target, end_target) = self.bounds(idx);

        let stage_duration = end.saturating_sub(start);
        let stage_elapsed = clamped.saturating_sub(start).min(stage_duration);

        Some(StageSnapshot {
            index: idx,
            count: self.stages.len(),
            stage_elapsed,
            stage_remaining: stage_duration.saturating_sub(stage_elapsed),
            start_target,
            end_target,
            current_target: self.target_at(elapsed),
        })
    }
}
