use std::time::Duration;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }

    /// Builds a stage from signed input (seconds, VUs). Negative values are rejected.
    pub fn from_signed(index: usize, duration_secs: f64, target: i64) -> Result<Self> {
        let duration =
            Duration::try_from_secs_f64(duration_secs).map_err(|_| Error::InvalidStage {
                index,
                reason: format!("duration must be non-negative seconds, got {duration_secs}"),
            })?;
        let target = u64::try_from(target).map_err(|_| Error::InvalidStage {
            index,
            reason: format!("target must be non-negative, got {target}"),
        })?;

        Ok(Self { duration, target })
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Control tick at which the scheduler reconciles active VUs with the target.
    pub tick: Duration,
    /// How long loops may keep running after the schedule ends before being aborted.
    pub graceful_stop: Duration,
    /// Hard cap on concurrently admitted VUs. Defaults to the highest stage target.
    pub max_vus: Option<u64>,
    pub progress_interval: Duration,
    pub threshold_eval_interval: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(100),
            graceful_stop: Duration::from_secs(30),
            max_vus: None,
            progress_interval: Duration::from_secs(1),
            threshold_eval_interval: Duration::from_secs(2),
        }
    }
}

impl SchedulerOptions {
    pub fn validate(&self) -> Result<()> {
        if self.tick.is_zero() {
            return Err(Error::InvalidOptions {
                option: "tick",
                reason: "must be a positive duration".to_string(),
            });
        }
        if self.progress_interval.is_zero() {
            return Err(Error::InvalidOptions {
                option: "progress_interval",
                reason: "must be a positive duration".to_string(),
            });
        }
        if self.threshold_eval_interval.is_zero() {
            return Err(Error::InvalidOptions {
                option: "threshold_eval_interval",
                reason: "must be a positive duration".to_string(),
            });
        }
        if self.max_vus == Some(0) {
            return Err(Error::InvalidOptions {
                option: "max_vus",
                reason: "must be a positive integer".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_stage_input_rejects_negatives() {
        assert!(matches!(
            Stage::from_signed(0, -1.0, 2),
            Err(Error::InvalidStage { index: 0, .. })
        ));
        assert!(matches!(
            Stage::from_signed(3, 1.0, -2),
            Err(Error::InvalidStage { index: 3, .. })
        ));
        assert!(matches!(
            Stage::from_signed(1, 1.5, 4),
            Ok(Stage { target: 4, .. })
        ));
    }

    #[test]
    fn default_options_are_valid() {
        assert!(SchedulerOptions::default().validate().is_ok());

        let opts = SchedulerOptions {
            tick: Duration::ZERO,
            ..SchedulerOptions::default()
        };
        assert!(matches!(
            opts.validate(),
            Err(Error::InvalidOptions { option: "tick", .. })
        ));
    }
}
