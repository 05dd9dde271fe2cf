//! Motor duty-cycle tracking.
//!
//! The lift motor is rated for a limited share of on-time (typically 10%:
//! two minutes in any twenty). Energized periods are kept in a sliding
//! window and a new hold is refused when it would push the total over the
//! limit. Periods use wall-clock time so they can be kept in a state file
//! and survive from one run of the tool to the next.

use log::warn;
use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::config::DutyCycleConfig;
use crate::error::LiftError;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DutyCycleStatus {
    /// Seconds energized inside the current window.
    pub current_usage: f64,
    pub max_usage: f64,
    pub remaining: f64,
    pub percentage_used: f64,
    pub window: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
struct UsagePeriod {
    start: SystemTime,
    end: SystemTime,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct DutyCycleState {
    usage_periods: VecDeque<UsagePeriod>, // oldest first
}

#[derive(Debug)]
pub struct DutyCycle {
    window: Duration,
    max_on_time: Duration,
    state_file: Option<PathBuf>,
    state: DutyCycleState,
}

impl DutyCycle {
    /// Builds the tracker, picking up earlier usage from the state file.
    ///
    /// A missing state file means no recorded usage; an unreadable one is a
    /// configuration error.
    pub fn load(config: &DutyCycleConfig) -> Result<Self, LiftError> {
        let state = match &config.state_file {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(path).map_err(|e| {
                    LiftError::Config(format!("Failed to read {}: {e}", path.display()))
                })?;
                serde_json::from_str(&contents).map_err(|e| {
                    LiftError::Config(format!("Invalid duty cycle state {}: {e}", path.display()))
                })?
            }
            _ => DutyCycleState::default(),
        };

        Ok(Self {
            window: config.window()?,
            max_on_time: config.max_on_time()?,
            state_file: config.state_file.clone(),
            state,
        })
    }

    fn window_start(&self, now: SystemTime) -> Option<SystemTime> {
        now.checked_sub(self.window)
    }

    fn prune(&mut self, now: SystemTime) {
        let Some(cutoff) = self.window_start(now) else {
            return;
        };
        let periods = &mut self.state.usage_periods;
        while periods.front().is_some_and(|p| p.end <= cutoff) {
            periods.pop_front();
        }
    }

    /// Energized time that falls inside the window ending at `now`.
    pub fn usage(&mut self, now: SystemTime) -> Duration {
        self.prune(now);
        let window_start = self.window_start(now);

        self.state
            .usage_periods
            .iter()
            .map(|p| {
                let start = match window_start {
                    Some(ws) => p.start.max(ws),
                    None => p.start,
                };
                let end = p.end.min(now);
                end.duration_since(start).unwrap_or_default()
            })
            .sum()
    }

    pub fn remaining(&mut self, now: SystemTime) -> Duration {
        self.max_on_time.saturating_sub(self.usage(now))
    }

    /// Refuses a hold of `required` if it would exceed the on-time budget.
    pub fn check(&mut self, required: Duration, now: SystemTime) -> Result<(), LiftError> {
        let usage = self.usage(now);
        if usage + required > self.max_on_time {
            return Err(LiftError::DutyCycleExceeded(format!(
                "{:.1}s requested, {:.1}s of {:.1}s used in the last {:.0}s",
                required.as_secs_f64(),
                usage.as_secs_f64(),
                self.max_on_time.as_secs_f64(),
                self.window.as_secs_f64()
            )));
        }
        Ok(())
    }

    /// Stores an energized period and writes the state file, if any.
    ///
    /// Runs on the release path, so a failed write is logged, not returned.
    pub fn record(&mut self, start: SystemTime, end: SystemTime) {
        if end <= start {
            return;
        }
        self.state.usage_periods.push_back(UsagePeriod { start, end });
        self.prune(end);

        if let Err(e) = self.save() {
            warn!("duty cycle usage not persisted: {e}");
        }
    }

    fn save(&self) -> Result<(), LiftError> {
        let Some(path) = &self.state_file else {
            return Ok(());
        };
        let contents = serde_json::to_string_pretty(&self.state)
            .map_err(|e| LiftError::Config(format!("serialize duty cycle state: {e}")))?;
        fs::write(path, contents)
            .map_err(|e| LiftError::Config(format!("write {}: {e}", path.display())))
    }

    pub fn status(&mut self, now: SystemTime) -> DutyCycleStatus {
        let usage = self.usage(now);
        let max = self.max_on_time.as_secs_f64();

        DutyCycleStatus {
            current_usage: usage.as_secs_f64(),
            max_usage: max,
            remaining: self.max_on_time.saturating_sub(usage).as_secs_f64(),
            percentage_used: usage.as_secs_f64() / max * 100.0,
            window: self.window.as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(window: f64, max_on_time: f64) -> DutyCycle {
        DutyCycle::load(&DutyCycleConfig {
            window,
            max_on_time,
            state_file: None,
        })
        .unwrap()
    }

    #[test]
    fn usage_accumulates_recorded_periods() {
        let mut duty = tracker(1200.0, 120.0);
        let t0 = SystemTime::now();

        duty.record(t0, t0 + Duration::from_secs(30));
        duty.record(t0 + Duration::from_secs(60), t0 + Duration::from_secs(90));

        let now = t0 + Duration::from_secs(100);
        assert_eq!(duty.usage(now), Duration::from_secs(60));
        assert_eq!(duty.remaining(now), Duration::from_secs(60));
        assert!(duty.check(Duration::from_secs(60), now).is_ok());
        assert!(matches!(
            duty.check(Duration::from_secs(61), now),
            Err(LiftError::DutyCycleExceeded(_))
        ));
    }

    #[test]
    fn periods_leave_the_window() {
        let mut duty = tracker(100.0, 20.0);
        let t0 = SystemTime::now();
        duty.record(t0, t0 + Duration::from_secs(20));

        assert!(duty.check(Duration::from_secs(1), t0 + Duration::from_secs(50)).is_err());

        // half of the period has slid out of the window
        let now = t0 + Duration::from_secs(110);
        assert_eq!(duty.usage(now), Duration::from_secs(10));

        let now = t0 + Duration::from_secs(130);
        assert_eq!(duty.usage(now), Duration::ZERO);
        assert!(duty.state.usage_periods.is_empty());
    }

    #[test]
    fn status_reports_percentage() {
        let mut duty = tracker(1200.0, 120.0);
        let t0 = SystemTime::now();
        duty.record(t0, t0 + Duration::from_secs(30));

        let status = duty.status(t0 + Duration::from_secs(40));
        assert_eq!(status.current_usage, 30.0);
        assert_eq!(status.remaining, 90.0);
        assert_eq!(status.percentage_used, 25.0);
        assert_eq!(status.window, 1200.0);
    }

    #[test]
    fn empty_periods_are_ignored() {
        let mut duty = tracker(1200.0, 120.0);
        let t0 = SystemTime::now();
        duty.record(t0, t0);
        assert!(duty.state.usage_periods.is_empty());
    }

    #[test]
    fn usage_survives_reload_from_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = DutyCycleConfig {
            window: 1200.0,
            max_on_time: 120.0,
            state_file: Some(dir.path().join("duty.json")),
        };
        let t0 = SystemTime::now();

        let mut first = DutyCycle::load(&config).unwrap();
        first.record(t0, t0 + Duration::from_secs(45));
        drop(first);

        let mut second = DutyCycle::load(&config).unwrap();
        let now = t0 + Duration::from_secs(50);
        assert_eq!(second.usage(now), Duration::from_secs(45));
        assert!(second.check(Duration::from_secs(80), now).is_err());
    }

    #[test]
    fn corrupt_state_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("duty.json");
        fs::write(&path, "not json").unwrap();

        let err = DutyCycle::load(&DutyCycleConfig {
            state_file: Some(path),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, LiftError::Config(_)));
    }
}
