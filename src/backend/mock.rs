use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::time::Instant;

use crate::error::LiftError;
use crate::gpio::{GpioBackend, Level};

/// In-memory backend used when no GPIO chip is available and by the tests.
///
/// Every level change is appended to a write log so callers can check the
/// exact sequence and timing of relay activity.
#[derive(Default)]
pub struct MockGpioBackend {
    pins: RwLock<FxHashMap<u32, Level>>, // keyed by line offset
    failing: RwLock<FxHashSet<u32>>,
    writes: Mutex<Vec<PinWrite>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinWrite {
    pub pin: u32,
    pub level: Level,
    pub at: Instant,
}

impl MockGpioBackend {
    /// Makes every subsequent write to `pin` fail until cleared again.
    pub fn fail_writes(&self, pin: u32, fail: bool) {
        let mut failing = self.failing.write();
        if fail {
            failing.insert(pin);
        } else {
            failing.remove(&pin);
        }
    }

    /// Current level of `pin`, `None` if it was never configured.
    pub fn level(&self, pin: u32) -> Option<Level> {
        self.pins.read().get(&pin).copied()
    }

    pub fn writes(&self) -> Vec<PinWrite> {
        self.writes.lock().clone()
    }

    pub fn writes_for(&self, pin: u32) -> Vec<PinWrite> {
        self.writes
            .lock()
            .iter()
            .filter(|w| w.pin == pin)
            .copied()
            .collect()
    }

    /// Forces a level without going through the write path, e.g. to mimic a
    /// line left energized by a previous run.
    pub fn preset(&self, pin: u32, level: Level) {
        self.pins.write().insert(pin, level);
    }

    fn check_failing(&self, pin: u32) -> Result<(), LiftError> {
        if self.failing.read().contains(&pin) {
            return Err(LiftError::HardwareIo(format!(
                "injected write failure on pin {pin}"
            )));
        }
        Ok(())
    }

    fn log(&self, pin: u32, level: Level) {
        self.writes.lock().push(PinWrite {
            pin,
            level,
            at: Instant::now(),
        });
    }
}

impl GpioBackend for MockGpioBackend {
    fn configure_output(&self, pin: u32, initial: Level) -> Result<(), LiftError> {
        self.check_failing(pin)?;
        self.pins.write().insert(pin, initial);
        self.log(pin, initial);
        Ok(())
    }

    fn write_level(&self, pin: u32, level: Level) -> Result<(), LiftError> {
        self.check_failing(pin)?;
        let mut pins = self.pins.write();
        let current = pins
            .get_mut(&pin)
            .ok_or_else(|| LiftError::HardwareIo(format!("pin {pin} not configured as output")))?;
        *current = level;
        drop(pins);

        self.log(pin, level);
        Ok(())
    }

    fn read_level(&self, pin: u32) -> Result<Level, LiftError> {
        self.pins
            .read()
            .get(&pin)
            .copied()
            .ok_or_else(|| LiftError::HardwareIo(format!("pin {pin} not configured as output")))
    }
}
