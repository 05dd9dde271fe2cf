use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::error::LiftError;
use crate::relay::{ActiveLevel, Direction, RelayLine};

const DEFAULT_CHIP: &str = "/dev/gpiochip0";
const DEFAULT_MOVE_SECS: f64 = 1.0;
const DEFAULT_NUDGE_SECS: f64 = 0.2;
const DEFAULT_MAX_HOLD_SECS: f64 = 30.0;
const DEFAULT_DUTY_WINDOW_SECS: f64 = 1200.0;
const DEFAULT_DUTY_MAX_ON_SECS: f64 = 120.0;

/// Sliding-window limit on how long the lift motor may run.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DutyCycleConfig {
    #[serde(default = "default_duty_window")]
    pub window: f64,
    #[serde(default = "default_duty_max_on_time")]
    pub max_on_time: f64,
    /// JSON file keeping usage periods across runs; in memory only when unset.
    #[serde(default)]
    pub state_file: Option<PathBuf>,
}

impl Default for DutyCycleConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_DUTY_WINDOW_SECS,
            max_on_time: DEFAULT_DUTY_MAX_ON_SECS,
            state_file: None,
        }
    }
}

impl DutyCycleConfig {
    pub fn window(&self) -> Result<Duration, LiftError> {
        secs("duty_cycle.window", self.window)
    }

    pub fn max_on_time(&self) -> Result<Duration, LiftError> {
        secs("duty_cycle.max_on_time", self.max_on_time)
    }
}

/// Pin assignment and timing limits. All durations are in seconds.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LiftConfig {
    pub up_pin: u32,
    pub down_pin: u32,
    #[serde(default = "default_chip")]
    pub chip: String,
    #[serde(default)]
    pub active_level: ActiveLevel,
    #[serde(default = "default_move_duration")]
    pub default_move_duration: f64,
    #[serde(default = "default_nudge_duration")]
    pub default_nudge_duration: f64,
    #[serde(default = "default_max_hold_duration")]
    pub max_hold_duration: f64,
    /// Ceiling for nudges; falls back to `max_hold_duration`.
    #[serde(default)]
    pub max_nudge_duration: Option<f64>,
    #[serde(default)]
    pub duty_cycle: Option<DutyCycleConfig>,
}

fn default_chip() -> String {
    DEFAULT_CHIP.to_string()
}

fn default_move_duration() -> f64 {
    DEFAULT_MOVE_SECS
}

fn default_nudge_duration() -> f64 {
    DEFAULT_NUDGE_SECS
}

fn default_max_hold_duration() -> f64 {
    DEFAULT_MAX_HOLD_SECS
}

fn default_duty_window() -> f64 {
    DEFAULT_DUTY_WINDOW_SECS
}

fn default_duty_max_on_time() -> f64 {
    DEFAULT_DUTY_MAX_ON_SECS
}

/// Converts a configured number of seconds, rejecting anything that is not
/// a positive duration `Duration` can hold.
fn secs(key: &str, value: f64) -> Result<Duration, LiftError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(LiftError::Config(format!(
            "'{key}' must be a positive number of seconds, got {value}"
        )));
    }
    Duration::try_from_secs_f64(value)
        .map_err(|e| LiftError::Config(format!("'{key}' is out of range ({value}s): {e}")))
}

impl LiftConfig {
    pub fn new(up_pin: u32, down_pin: u32) -> Self {
        Self {
            up_pin,
            down_pin,
            chip: default_chip(),
            active_level: ActiveLevel::default(),
            default_move_duration: DEFAULT_MOVE_SECS,
            default_nudge_duration: DEFAULT_NUDGE_SECS,
            max_hold_duration: DEFAULT_MAX_HOLD_SECS,
            max_nudge_duration: None,
            duty_cycle: None,
        }
    }

    /// Loads YAML for `.yaml`/`.yml` files and JSON for anything else.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, LiftError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| LiftError::Config(format!("Failed to read config: {e}")))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&contents),
            _ => Self::from_json_str(&contents),
        }
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, LiftError> {
        let config: Self = serde_yaml::from_str(contents)
            .map_err(|e| LiftError::Config(format!("Invalid config yaml: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(contents: &str) -> Result<Self, LiftError> {
        let config: Self = serde_json::from_str(contents)
            .map_err(|e| LiftError::Config(format!("Invalid config json: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LiftError> {
        if self.up_pin == self.down_pin {
            return Err(LiftError::Config(format!(
                "'up_pin' and 'down_pin' must differ, both are {}",
                self.up_pin
            )));
        }

        self.default_move()?;
        self.default_nudge()?;
        self.max_hold()?;
        if let Some(max_nudge) = self.max_nudge_duration {
            secs("max_nudge_duration", max_nudge)?;
            if max_nudge > self.max_hold_duration {
                return Err(LiftError::Config(format!(
                    "'max_nudge_duration' ({max_nudge}s) exceeds 'max_hold_duration' ({}s)",
                    self.max_hold_duration
                )));
            }
        }

        if self.default_move_duration > self.max_hold_duration {
            return Err(LiftError::Config(format!(
                "'default_move_duration' ({}s) exceeds 'max_hold_duration' ({}s)",
                self.default_move_duration, self.max_hold_duration
            )));
        }
        if self.default_nudge_duration > self.max_nudge_secs() {
            return Err(LiftError::Config(format!(
                "'default_nudge_duration' ({}s) exceeds the nudge ceiling ({}s)",
                self.default_nudge_duration,
                self.max_nudge_secs()
            )));
        }

        if let Some(duty) = &self.duty_cycle {
            duty.window()?;
            duty.max_on_time()?;
            if duty.max_on_time > duty.window {
                return Err(LiftError::Config(format!(
                    "'duty_cycle.max_on_time' ({}s) exceeds 'duty_cycle.window' ({}s)",
                    duty.max_on_time, duty.window
                )));
            }
        }

        Ok(())
    }

    fn max_nudge_secs(&self) -> f64 {
        self.max_nudge_duration.unwrap_or(self.max_hold_duration)
    }

    pub fn relay_lines(&self) -> (RelayLine, RelayLine) {
        (
            RelayLine {
                direction: Direction::Up,
                pin_id: self.up_pin,
                active_level: self.active_level,
            },
            RelayLine {
                direction: Direction::Down,
                pin_id: self.down_pin,
                active_level: self.active_level,
            },
        )
    }

    pub fn default_move(&self) -> Result<Duration, LiftError> {
        secs("default_move_duration", self.default_move_duration)
    }

    pub fn default_nudge(&self) -> Result<Duration, LiftError> {
        secs("default_nudge_duration", self.default_nudge_duration)
    }

    pub fn max_hold(&self) -> Result<Duration, LiftError> {
        secs("max_hold_duration", self.max_hold_duration)
    }

    pub fn max_nudge(&self) -> Result<Duration, LiftError> {
        secs("max_nudge_duration", self.max_nudge_secs())
    }

    /// Converts caller-supplied seconds into a hold duration.
    pub fn hold_duration(seconds: f64) -> Result<Duration, LiftError> {
        if !seconds.is_finite() || seconds <= 0.0 {
            return Err(LiftError::InvalidDuration(format!(
                "duration must be a positive, finite number of seconds, got {seconds}"
            )));
        }
        Duration::try_from_secs_f64(seconds)
            .map_err(|e| LiftError::InvalidDuration(format!("{seconds}s: {e}")))
    }
}
