use thiserror::Error;

use crate::relay::Direction;

#[derive(Debug, Error)]
pub enum LiftError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Invalid duration: {0}")]
    InvalidDuration(String),
    #[error("Cannot activate {requested}: {active} is already active")]
    ConcurrentActivation {
        active: Direction,
        requested: Direction,
    },
    #[error("GPIO error: {0}")]
    HardwareIo(String),
    #[error("Duty cycle exceeded: {0}")]
    DutyCycleExceeded(String),
}

impl LiftError {
    /// Errors the caller may recover from by retrying, waiting or stopping first.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            LiftError::InvalidDuration(_)
                | LiftError::ConcurrentActivation { .. }
                | LiftError::DutyCycleExceeded(_)
        )
    }
}
