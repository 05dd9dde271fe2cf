use log::debug;
use std::path::PathBuf;

use libgpiod::{chip::Chip, line, request};
use parking_lot::{FairMutex, RwLock};
use rustc_hash::FxHashMap;

use crate::error::LiftError;
use crate::gpio::{GpioBackend, Level};

/// GPIO character device backend.
///
/// Each relay line gets its own request so a failing line cannot take the
/// other one down with it.
pub struct LibgpiodBackend {
    chip: String,
    lines: RwLock<FxHashMap<u32, FairMutex<GpiodHandle>>>, // keyed by line offset
}

struct GpiodHandle {
    request: request::Request,
}

impl GpiodHandle {
    fn new(chip: &str, line_cfg: &line::Config) -> Result<Self, LiftError> {
        let chip = Self::open_chip(chip)?;
        let request = Self::request_lines(&chip, line_cfg)?;
        Ok(Self { request })
    }

    fn open_chip(path: &str) -> Result<Chip, LiftError> {
        let p = PathBuf::from(path);
        Chip::open(&p).map_err(|e| LiftError::HardwareIo(format!("open chip {path}: {e}")))
    }

    fn request_lines(chip: &Chip, line_cfg: &line::Config) -> Result<request::Request, LiftError> {
        let mut req_cfg = request::Config::new()
            .map_err(|e| LiftError::HardwareIo(format!("request config: {e}")))?;
        req_cfg
            .set_consumer(env!("CARGO_PKG_NAME"))
            .map_err(|e| LiftError::HardwareIo(format!("request consumer: {e}")))?;
        chip.request_lines(Some(&req_cfg), line_cfg)
            .map_err(|e| LiftError::HardwareIo(format!("request lines: {e}")))
    }
}

impl LibgpiodBackend {
    pub fn new(chip: impl Into<String>) -> Result<Self, LiftError> {
        let chip = chip.into();
        // fail early if the chip does not exist or is not accessible
        GpiodHandle::open_chip(&chip)?;

        Ok(Self {
            chip,
            lines: RwLock::new(FxHashMap::default()),
        })
    }

    fn to_value(level: Level) -> line::Value {
        match level {
            Level::Low => line::Value::InActive,
            Level::High => line::Value::Active,
        }
    }

    fn make_line_config(offset: u32, initial: Level) -> Result<line::Config, LiftError> {
        let mut ls = line::Settings::new()
            .map_err(|e| LiftError::HardwareIo(format!("libgpiod settings: {e}")))?;
        ls.set_direction(line::Direction::Output)
            .map_err(|e| LiftError::HardwareIo(format!("set direction: {e}")))?;
        ls.set_drive(line::Drive::PushPull)
            .map_err(|e| LiftError::HardwareIo(format!("set drive: {e}")))?;
        ls.set_output_value(Self::to_value(initial))
            .map_err(|e| LiftError::HardwareIo(format!("set output value: {e}")))?;

        let mut cfg = line::Config::new()
            .map_err(|e| LiftError::HardwareIo(format!("line config: {e}")))?;
        cfg.add_line_settings(&[offset], ls)
            .map_err(|e| LiftError::HardwareIo(format!("line config add settings: {e}")))?;
        Ok(cfg)
    }

    fn not_configured(pin: u32) -> LiftError {
        LiftError::HardwareIo(format!("pin {pin} not configured as output"))
    }
}

impl GpioBackend for LibgpiodBackend {
    fn configure_output(&self, pin: u32, initial: Level) -> Result<(), LiftError> {
        let line_cfg = Self::make_line_config(pin, initial)?;
        let mut lines = self.lines.write();

        match lines.get(&pin) {
            Some(handle) => {
                handle
                    .lock()
                    .request
                    .reconfigure_lines(&line_cfg)
                    .map_err(|e| LiftError::HardwareIo(format!("reconfigure lines: {e}")))?;
            }
            None => {
                let handle = GpiodHandle::new(&self.chip, &line_cfg)?;
                lines.insert(pin, FairMutex::new(handle));
            }
        }

        debug!("{} line {pin} claimed as output, initial {initial:?}", self.chip);
        Ok(())
    }

    fn write_level(&self, pin: u32, level: Level) -> Result<(), LiftError> {
        let lines = self.lines.read();
        let handle = lines.get(&pin).ok_or_else(|| Self::not_configured(pin))?;

        handle
            .lock()
            .request
            .set_value(pin, Self::to_value(level))
            .map_err(|e| LiftError::HardwareIo(format!("set value on pin {pin}: {e}")))?;
        Ok(())
    }

    fn read_level(&self, pin: u32) -> Result<Level, LiftError> {
        let lines = self.lines.read();
        let handle = lines.get(&pin).ok_or_else(|| Self::not_configured(pin))?;

        let value = handle
            .lock()
            .request
            .value(pin)
            .map_err(|e| LiftError::HardwareIo(format!("get value on pin {pin}: {e}")))?;
        Ok(match value {
            line::Value::InActive => Level::Low,
            line::Value::Active => Level::High,
        })
    }
}
