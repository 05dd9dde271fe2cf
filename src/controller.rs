//! Timed relay activation with mutual exclusion and emergency stop.
//!
//! A hold energizes one relay, waits, and releases it. The wait races a
//! stop signal, and the release lives in a drop guard, so expiry, an
//! emergency stop and a dropped future all end on the same release path.

use log::{error, info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::config::LiftConfig;
use crate::duty_cycle::{DutyCycle, DutyCycleStatus};
use crate::error::LiftError;
use crate::gpio::GpioBackend;
use crate::relay::{Direction, RelayLine, RelayPins};

/// Named category of a hold. Mechanics are identical, ceilings may differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldKind {
    Move,
    Nudge,
}

impl fmt::Display for HoldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HoldKind::Move => f.write_str("move"),
            HoldKind::Nudge => f.write_str("nudge"),
        }
    }
}

#[derive(Debug, Default)]
struct ControllerState {
    current_direction: Option<Direction>,
    activation_started_at: Option<Instant>,
    /// Sequence number of the most recent activation.
    activation: u64,
    duty_cycle: Option<DutyCycle>,
}

impl ControllerState {
    /// Clears the active hold, charging its on-time to the duty cycle.
    fn end_activation(&mut self) -> Option<Direction> {
        let direction = self.current_direction.take();
        if let Some(started) = self.activation_started_at.take()
            && let Some(duty) = self.duty_cycle.as_mut()
        {
            // measured on the monotonic clock, stored on the wall clock
            let end = SystemTime::now();
            let start = end.checked_sub(started.elapsed()).unwrap_or(end);
            duty.record(start, end);
        }
        direction
    }
}

pub struct LiftController<B: GpioBackend> {
    pins: RelayPins<B>,
    max_hold: Duration,
    max_nudge: Duration,
    state: Mutex<ControllerState>,
    stop_tx: watch::Sender<u64>,
}

/// Owns the release of one activation.
struct ActiveHold<'a, B: GpioBackend> {
    controller: &'a LiftController<B>,
    line: RelayLine,
    activation: u64,
    stop_rx: watch::Receiver<u64>,
}

impl<B: GpioBackend> Drop for ActiveHold<'_, B> {
    fn drop(&mut self) {
        self.controller.finish(self.line, self.activation);
    }
}

impl<B: GpioBackend> LiftController<B> {
    /// Claims both relay lines, released, and starts idle.
    pub fn new(config: &LiftConfig, backend: Arc<B>) -> Result<Self, LiftError> {
        config.validate()?;

        let (up, down) = config.relay_lines();
        let pins = RelayPins::new(backend, up, down)?;
        let (stop_tx, _) = watch::channel(0);

        let max_hold = config.max_hold()?;
        let duty_cycle = config.duty_cycle.as_ref().map(DutyCycle::load).transpose()?;

        info!(
            "lift controller ready: up pin {}, down pin {}, active {:?}, max hold {max_hold:?}",
            up.pin_id, down.pin_id, up.active_level
        );

        Ok(Self {
            pins,
            max_hold,
            max_nudge: config.max_nudge()?,
            state: Mutex::new(ControllerState {
                duty_cycle,
                ..Default::default()
            }),
            stop_tx,
        })
    }

    /// Energizes `direction` for `duration`, then releases it.
    pub async fn move_for(&self, direction: Direction, duration: Duration) -> Result<(), LiftError> {
        self.hold(HoldKind::Move, direction, duration).await
    }

    /// Same as [`move_for`](Self::move_for), bounded by the nudge ceiling.
    pub async fn nudge(&self, direction: Direction, duration: Duration) -> Result<(), LiftError> {
        self.hold(HoldKind::Nudge, direction, duration).await
    }

    /// Runs one timed hold.
    ///
    /// Returns once the relay is released: when `duration` elapses or
    /// when [`emergency_stop`](Self::emergency_stop) cuts it short. Dropping
    /// the future mid-hold releases the relay as well.
    pub async fn hold(
        &self,
        kind: HoldKind,
        direction: Direction,
        duration: Duration,
    ) -> Result<(), LiftError> {
        self.validate_duration(kind, duration)?;

        let mut hold = self.activate(kind, direction, duration)?;
        let interrupted = tokio::select! {
            _ = time::sleep(duration) => false,
            _ = hold.stop_rx.changed() => true,
        };
        drop(hold);

        if interrupted {
            warn!("{kind} {direction} interrupted by emergency stop");
        } else {
            info!("{kind} {direction} finished after {duration:?}");
        }
        Ok(())
    }

    /// Releases both relays and returns to idle, whatever the current state.
    pub fn emergency_stop(&self) {
        if !self.stop_all() {
            error!("emergency stop could not confirm that both relays are released");
        }
    }

    /// Final stop before the host exits.
    ///
    /// Unlike [`emergency_stop`](Self::emergency_stop) this reads both lines
    /// back and reports an unconfirmed release so the host can raise it to
    /// the operator.
    pub fn shutdown(&self) -> Result<(), LiftError> {
        let released = self.stop_all();
        if released && self.pins.confirm_released() {
            Ok(())
        } else {
            Err(LiftError::HardwareIo(
                "relay release could not be confirmed on shutdown".into(),
            ))
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().current_direction.is_some()
    }

    pub fn active_direction(&self) -> Option<Direction> {
        self.state.lock().current_direction
    }

    pub fn active_since(&self) -> Option<Instant> {
        self.state.lock().activation_started_at
    }

    /// `None` when no duty-cycle limit is configured.
    pub fn duty_cycle_status(&self) -> Option<DutyCycleStatus> {
        self.state
            .lock()
            .duty_cycle
            .as_mut()
            .map(|duty| duty.status(SystemTime::now()))
    }

    fn validate_duration(&self, kind: HoldKind, duration: Duration) -> Result<(), LiftError> {
        let ceiling = match kind {
            HoldKind::Move => self.max_hold,
            HoldKind::Nudge => self.max_nudge,
        };

        if duration.is_zero() {
            return Err(LiftError::InvalidDuration(format!(
                "{kind} duration must be positive"
            )));
        }
        if duration > ceiling {
            return Err(LiftError::InvalidDuration(format!(
                "{kind} duration {:.3}s exceeds the {:.3}s limit",
                duration.as_secs_f64(),
                ceiling.as_secs_f64()
            )));
        }
        Ok(())
    }

    fn activate(
        &self,
        kind: HoldKind,
        direction: Direction,
        duration: Duration,
    ) -> Result<ActiveHold<'_, B>, LiftError> {
        let mut state = self.state.lock();

        if let Some(active) = state.current_direction {
            warn!("{kind} {direction} rejected: {active} is active");
            return Err(LiftError::ConcurrentActivation {
                active,
                requested: direction,
            });
        }

        if let Some(duty) = state.duty_cycle.as_mut() {
            duty.check(duration, SystemTime::now())?;
        }

        // never energize while the opposite relay may still be closed
        self.pins.release(self.pins.line(direction.opposite()))?;

        let line = self.pins.line(direction);
        if let Err(e) = self.pins.assert(line) {
            if let Err(release_err) = self.pins.release(line) {
                error!("failed to release {direction} relay after failed assert: {release_err}");
            }
            return Err(e);
        }

        state.activation += 1;
        state.current_direction = Some(direction);
        state.activation_started_at = Some(Instant::now());
        info!("{kind} {direction} for {duration:?}");

        Ok(ActiveHold {
            controller: self,
            line,
            activation: state.activation,
            stop_rx: self.stop_tx.subscribe(),
        })
    }

    /// Release path shared by expiry and cancellation of a hold.
    fn finish(&self, line: RelayLine, activation: u64) {
        let mut state = self.state.lock();

        // already ended by an emergency stop
        if state.activation != activation || state.current_direction.is_none() {
            return;
        }

        if let Err(e) = self.pins.release(line) {
            error!(
                "failed to release {} relay (pin {}), treating as released: {e}",
                line.direction, line.pin_id
            );
        }
        state.end_activation();
    }

    fn stop_all(&self) -> bool {
        let mut state = self.state.lock();

        let confirmed = self.pins.release_all();
        if let Some(direction) = state.end_activation() {
            warn!("emergency stop: {direction} relay released");
        }
        self.stop_tx.send_modify(|epoch| *epoch += 1);

        confirmed
    }
}

impl<B: GpioBackend + 'static> LiftController<B> {
    /// Starts a hold on the runtime and returns without waiting for it.
    pub fn spawn_hold(
        self: &Arc<Self>,
        kind: HoldKind,
        direction: Direction,
        duration: Duration,
    ) -> JoinHandle<Result<(), LiftError>> {
        let controller = Arc::clone(self);
        tokio::spawn(async move { controller.hold(kind, direction, duration).await })
    }
}

impl<B: GpioBackend> Drop for LiftController<B> {
    fn drop(&mut self) {
        if !self.pins.release_all() {
            error!("relay release could not be confirmed at teardown");
        }
    }
}
