use log::{debug, error};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::LiftError;
use crate::gpio::{GpioBackend, Level};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

impl FromStr for Direction {
    type Err = LiftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            other => Err(LiftError::Config(format!(
                "direction must be 'up' or 'down', got '{other}'"
            ))),
        }
    }
}

/// Which physical level energizes the relay.
///
/// Relay boards driven from a Raspberry Pi are usually active-low: pulling
/// the line low closes the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveLevel {
    #[default]
    Low,
    High,
}

impl ActiveLevel {
    pub fn active(self) -> Level {
        match self {
            ActiveLevel::Low => Level::Low,
            ActiveLevel::High => Level::High,
        }
    }

    pub fn inactive(self) -> Level {
        self.active().inverted()
    }
}

/// One relay output wired to a button of the hand remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayLine {
    pub direction: Direction,
    pub pin_id: u32,
    pub active_level: ActiveLevel,
}

/// The UP and DOWN relay outputs, exclusively owned.
pub struct RelayPins<B: GpioBackend> {
    backend: Arc<B>,
    up: RelayLine,
    down: RelayLine,
}

impl<B: GpioBackend> RelayPins<B> {
    /// Claims both lines as outputs at their released level.
    ///
    /// Lines are driven released from the moment they are claimed, so a
    /// relay left energized by a crashed run is dropped here.
    pub fn new(backend: Arc<B>, up: RelayLine, down: RelayLine) -> Result<Self, LiftError> {
        if up.pin_id == down.pin_id {
            return Err(LiftError::Config(format!(
                "up and down relays share pin {}",
                up.pin_id
            )));
        }

        for line in [up, down] {
            backend.configure_output(line.pin_id, line.active_level.inactive())?;
        }

        Ok(Self { backend, up, down })
    }

    pub fn line(&self, direction: Direction) -> RelayLine {
        match direction {
            Direction::Up => self.up,
            Direction::Down => self.down,
        }
    }

    pub fn assert(&self, line: RelayLine) -> Result<(), LiftError> {
        self.backend
            .write_level(line.pin_id, line.active_level.active())?;
        debug!("{} relay (pin {}) energized", line.direction, line.pin_id);
        Ok(())
    }

    /// Drives `line` to its released level.
    ///
    /// On error the line must still be treated as released by the caller;
    /// nothing may be left waiting on a confirmation that never comes.
    pub fn release(&self, line: RelayLine) -> Result<(), LiftError> {
        self.backend
            .write_level(line.pin_id, line.active_level.inactive())?;
        debug!("{} relay (pin {}) released", line.direction, line.pin_id);
        Ok(())
    }

    /// Releases both lines, returning whether every release was confirmed.
    ///
    /// A failure on one line never prevents the attempt on the other.
    pub fn release_all(&self) -> bool {
        let mut confirmed = true;
        for line in [self.up, self.down] {
            if let Err(e) = self.release(line) {
                error!(
                    "failed to release {} relay (pin {}): {e}",
                    line.direction, line.pin_id
                );
                confirmed = false;
            }
        }
        confirmed
    }

    pub fn is_asserted(&self, line: RelayLine) -> Result<bool, LiftError> {
        let level = self.backend.read_level(line.pin_id)?;
        Ok(level == line.active_level.active())
    }

    /// Reads both lines back; false unless each one reads released.
    pub fn confirm_released(&self) -> bool {
        [self.up, self.down].into_iter().all(|line| match self.is_asserted(line) {
            Ok(asserted) => !asserted,
            Err(e) => {
                error!(
                    "cannot read back {} relay (pin {}): {e}",
                    line.direction, line.pin_id
                );
                false
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockGpioBackend;

    fn lines(active_level: ActiveLevel) -> (RelayLine, RelayLine) {
        (
            RelayLine {
                direction: Direction::Up,
                pin_id: 17,
                active_level,
            },
            RelayLine {
                direction: Direction::Down,
                pin_id: 27,
                active_level,
            },
        )
    }

    #[test]
    fn construction_drives_lines_released() {
        let backend = Arc::new(MockGpioBackend::default());
        backend.preset(17, Level::Low);
        let (up, down) = lines(ActiveLevel::Low);

        let pins = RelayPins::new(backend.clone(), up, down).unwrap();

        assert_eq!(backend.level(17), Some(Level::High));
        assert_eq!(backend.level(27), Some(Level::High));
        assert!(!pins.is_asserted(up).unwrap());
    }

    #[test]
    fn active_low_assert_pulls_line_low() {
        let backend = Arc::new(MockGpioBackend::default());
        let (up, down) = lines(ActiveLevel::Low);
        let pins = RelayPins::new(backend.clone(), up, down).unwrap();

        pins.assert(up).unwrap();
        assert_eq!(backend.level(17), Some(Level::Low));
        assert!(pins.is_asserted(up).unwrap());

        // asserting twice is not an error
        pins.assert(up).unwrap();
        assert_eq!(backend.level(17), Some(Level::Low));

        pins.release(up).unwrap();
        pins.release(up).unwrap();
        assert_eq!(backend.level(17), Some(Level::High));
    }

    #[test]
    fn active_high_wiring_inverts_levels() {
        let backend = Arc::new(MockGpioBackend::default());
        let (up, down) = lines(ActiveLevel::High);
        let pins = RelayPins::new(backend.clone(), up, down).unwrap();

        assert_eq!(backend.level(27), Some(Level::Low));
        pins.assert(down).unwrap();
        assert_eq!(backend.level(27), Some(Level::High));
    }

    #[test]
    fn release_all_continues_past_failing_line() {
        let backend = Arc::new(MockGpioBackend::default());
        let (up, down) = lines(ActiveLevel::Low);
        let pins = RelayPins::new(backend.clone(), up, down).unwrap();
        pins.assert(up).unwrap();
        pins.assert(down).unwrap();

        backend.fail_writes(17, true);
        assert!(!pins.release_all());
        assert_eq!(backend.level(27), Some(Level::High));

        // the failed write left up energized
        assert!(!pins.confirm_released());

        backend.fail_writes(17, false);
        assert!(pins.release_all());
        assert!(pins.release_all());
        assert!(pins.confirm_released());
    }

    #[test]
    fn shared_pin_is_rejected() {
        let backend = Arc::new(MockGpioBackend::default());
        let (up, mut down) = lines(ActiveLevel::Low);
        down.pin_id = up.pin_id;

        let err = RelayPins::new(backend, up, down).err().unwrap();
        assert!(matches!(err, LiftError::Config(_)));
    }

    #[test]
    fn direction_parses_case_insensitively() {
        assert_eq!("UP".parse::<Direction>().unwrap(), Direction::Up);
        assert_eq!(" down ".parse::<Direction>().unwrap(), Direction::Down);
        assert!("sideways".parse::<Direction>().is_err());
        assert_eq!(Direction::Up.opposite(), Direction::Down);
    }
}
