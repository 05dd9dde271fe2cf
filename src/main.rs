use log::{error, info, warn};
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::SystemTime;

use clap::{Parser, Subcommand};

use liftctl::{
    Direction, DutyCycle, GpioBackend, HoldKind, LiftConfig, LiftController, LiftError,
};

#[cfg(feature = "hardware-gpio")]
use liftctl::LibgpiodBackend;
#[cfg(not(feature = "hardware-gpio"))]
use liftctl::MockGpioBackend;

const EXIT_ERROR: u8 = 1;
const EXIT_RELAY_UNSAFE: u8 = 2;

#[derive(Parser)]
#[command(
    name = "liftctl",
    about = "Drive a lifting column through the relays on its hand remote",
    version
)]
struct Cli {
    /// Config file, YAML (.yaml/.yml) or JSON
    #[arg(long, short, env = "LIFTCTL_CONFIG", default_value = "lift.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Hold UP
    Up {
        /// Seconds to hold (default: default_move_duration)
        #[arg(short, long)]
        time: Option<f64>,
    },
    /// Hold DOWN
    Down {
        /// Seconds to hold (default: default_move_duration)
        #[arg(short, long)]
        time: Option<f64>,
    },
    /// Short hold in one direction
    Nudge {
        direction: Direction,
        /// Seconds to hold (default: default_nudge_duration)
        #[arg(short, long)]
        time: Option<f64>,
    },
    /// Release both relays
    Stop,
    /// Print duty-cycle usage as JSON
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let config = match LiftConfig::load_from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("{}: {e}", cli.config.display());
            return ExitCode::from(EXIT_ERROR);
        }
    };

    if let Command::Status = cli.command {
        return match duty_cycle_report(&config) {
            Ok(report) => {
                println!("{report}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("{e}");
                ExitCode::from(EXIT_ERROR)
            }
        };
    }

    let backend = {
        #[cfg(feature = "hardware-gpio")]
        {
            match LibgpiodBackend::new(config.chip.clone()) {
                Ok(backend) => Arc::new(backend),
                Err(e) => {
                    error!("Failed to init libgpiod backend: {e}");
                    return ExitCode::from(EXIT_ERROR);
                }
            }
        }
        #[cfg(not(feature = "hardware-gpio"))]
        {
            Arc::new(MockGpioBackend::default())
        }
    };

    let controller = match LiftController::new(&config, backend) {
        Ok(controller) => controller,
        Err(e) => {
            error!("Failed to set up relays: {e}");
            return ExitCode::from(EXIT_ERROR);
        }
    };

    let outcome = run(&controller, &config, cli.command, shutdown_signal()).await;
    ExitCode::from(exit_status(&controller, outcome))
}

/// Duty-cycle usage read from the state file, without claiming any line.
fn duty_cycle_report(config: &LiftConfig) -> Result<String, LiftError> {
    let status = match &config.duty_cycle {
        Some(duty) => Some(DutyCycle::load(duty)?.status(SystemTime::now())),
        None => None,
    };
    serde_json::to_string_pretty(&status)
        .map_err(|e| LiftError::Config(format!("serialize duty cycle status: {e}")))
}

/// Runs one command, cutting a hold short when `stop` resolves first.
async fn run<B: GpioBackend>(
    controller: &LiftController<B>,
    config: &LiftConfig,
    command: Command,
    stop: impl Future<Output = &'static str>,
) -> Result<(), LiftError> {
    let (kind, direction, time) = match command {
        Command::Stop => {
            controller.emergency_stop();
            info!("relays released");
            return Ok(());
        }
        Command::Status => return Ok(()),
        Command::Up { time } => (HoldKind::Move, Direction::Up, time),
        Command::Down { time } => (HoldKind::Move, Direction::Down, time),
        Command::Nudge { direction, time } => (HoldKind::Nudge, direction, time),
    };

    let duration = match (time, kind) {
        (Some(seconds), _) => LiftConfig::hold_duration(seconds)?,
        (None, HoldKind::Move) => config.default_move()?,
        (None, HoldKind::Nudge) => config.default_nudge()?,
    };

    // stop is polled first so signal listeners exist before a relay closes
    tokio::select! {
        biased;
        signal = stop => {
            warn!("received {signal}, stopping lift");
            controller.emergency_stop();
            Ok(())
        }
        result = controller.hold(kind, direction, duration) => result,
    }
}

/// Releases the relays and maps the outcome to the process exit status.
///
/// An unconfirmed release wins over any command error.
fn exit_status<B: GpioBackend>(
    controller: &LiftController<B>,
    outcome: Result<(), LiftError>,
) -> u8 {
    if let Err(e) = controller.shutdown() {
        error!("{e}");
        eprintln!("DANGER: {e}. The lift may still be moving, cut its power now.");
        return EXIT_RELAY_UNSAFE;
    }

    match outcome {
        Ok(()) => 0,
        Err(e) => {
            error!("{e}");
            EXIT_ERROR
        }
    }
}

async fn wait_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for SIGINT: {e}");
        std::future::pending::<()>().await;
    }
}

async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => tokio::select! {
                _ = wait_ctrl_c() => "SIGINT",
                _ = term.recv() => "SIGTERM",
            },
            Err(e) => {
                warn!("cannot listen for SIGTERM: {e}");
                wait_ctrl_c().await;
                "SIGINT"
            }
        }
    }
    #[cfg(not(unix))]
    {
        wait_ctrl_c().await;
        "interrupt"
    }
}
