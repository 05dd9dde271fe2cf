use crate::error::LiftError;

/// Physical level of an output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn inverted(self) -> Self {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

/// Line-level access to the GPIO hardware.
///
/// Pins are addressed by their line offset on the configured chip. Backends
/// only move physical levels; which level energizes a relay is decided by
/// [`RelayLine`](crate::relay::RelayLine).
pub trait GpioBackend: Send + Sync {
    /// Claims `pin` as an output, driving `initial` from the first instant.
    fn configure_output(&self, pin: u32, initial: Level) -> Result<(), LiftError>;
    fn write_level(&self, pin: u32, level: Level) -> Result<(), LiftError>;
    fn read_level(&self, pin: u32) -> Result<Level, LiftError>;
}
