pub mod backend;
mod config;
mod controller;
mod duty_cycle;
mod error;
mod gpio;
mod relay;

pub use config::{DutyCycleConfig, LiftConfig};
pub use controller::{HoldKind, LiftController};
pub use duty_cycle::{DutyCycle, DutyCycleStatus};
pub use error::LiftError;
pub use gpio::{GpioBackend, Level};
pub use relay::{ActiveLevel, Direction, RelayLine, RelayPins};

#[cfg(feature = "hardware-gpio")]
pub use backend::LibgpiodBackend;
pub use backend::MockGpioBackend;
