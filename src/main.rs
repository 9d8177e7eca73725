//! # MESC Capture
//!
//! Capture phase snapshots and live telemetry from a MESC motor controller.
//!
//! This application opens the controller's serial console, runs one capture
//! (or a single console command) through the capture engine and exports the
//! result as CSV.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::Parser;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{sleep, timeout, Duration};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, LogArgs, SendArgs, SnapshotArgs};
use mesc_capture::capture::export::default_export_path;
use mesc_capture::capture::{CaptureEngine, CaptureMode, CaptureStatus, EngineHandle};
use mesc_capture::config::{is_valid_channel_name, Config};
use mesc_capture::protocol::Command;
use mesc_capture::serial::{
    Direction, MescSerial, TokioSerialPort, TrafficEvent, DEFAULT_DEVICE_PATHS,
};

/// Configuration file picked up from the working directory
const DEFAULT_CONFIG_FILE: &str = "mesc-capture.toml";

/// Port value that probes [`DEFAULT_DEVICE_PATHS`]
const AUTO_PORT: &str = "auto";

/// Main entry point for MESC Capture
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load and validate configuration, apply command line overrides
///    - Set up logging (console, plus a daily file when configured)
///    - Open the serial console and spawn the capture engine
///
/// 2. **Capture**
///    - Run the requested subcommand against the engine handle
///    - Ctrl+C cancels a snapshot or stops a log stream
///
/// 3. **Shutdown**
///    - Stop the engine, which resets logging on the controller if a
///      stream is still active
///
/// # Examples
///
/// ```bash
/// mesc-capture snapshot --out phase.csv
/// mesc-capture log --channel vbus --channel Iu_avg --duration-s 10
/// mesc-capture send status
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    let _log_guard = init_logging(cli.verbose, config.logging.file_dir.as_deref())?;

    info!("MESC Capture v{} starting...", env!("CARGO_PKG_VERSION"));

    let port = open_port(&config)?;
    let (engine, handle) = CaptureEngine::new(port, &config);
    let engine_task = tokio::spawn(engine.run());

    let outcome = match cli.command {
        cli::Command::Snapshot(args) => run_snapshot(&handle, &config, args).await,
        cli::Command::Log(args) => run_log(&handle, &config, args).await,
        cli::Command::Send(args) => run_send(&handle, args).await,
        cli::Command::Estop => run_estop(&handle).await,
    };

    if let Err(e) = handle.shutdown().await {
        warn!("Engine already stopped: {}", e);
    }
    match engine_task.await {
        Ok(Err(e)) => warn!("Capture engine ended with error: {}", e),
        Err(e) => warn!("Capture engine task failed: {}", e),
        Ok(Ok(())) => {}
    }

    outcome
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => Config::load(DEFAULT_CONFIG_FILE)
            .with_context(|| format!("failed to load {}", DEFAULT_CONFIG_FILE))?,
        None => Config::default(),
    };

    if let Some(port) = &cli.port {
        config.serial.port = port.clone();
    }
    if let Some(baud) = cli.baud {
        config.serial.baud_rate = baud;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn init_logging(verbose: u8, file_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("mesc_capture={}", level)));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    match file_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log dir {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "mesc-capture.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Ok(Some(guard))
        }
        None => {
            registry.init();
            Ok(None)
        }
    }
}

fn open_port(config: &Config) -> Result<TokioSerialPort> {
    if config.serial.port == AUTO_PORT {
        let (port, path) = MescSerial::open_with_paths(DEFAULT_DEVICE_PATHS, config.serial.baud_rate)?;
        info!("MESC console found at {}", path);
        Ok(port)
    } else {
        Ok(MescSerial::open(&config.serial.port, config.serial.baud_rate)?)
    }
}

fn export_path(out: Option<PathBuf>, config: &Config, mode: CaptureMode) -> PathBuf {
    out.unwrap_or_else(|| default_export_path(&config.export.dir, mode, Local::now()))
}

async fn run_snapshot(handle: &EngineHandle, config: &Config, args: SnapshotArgs) -> Result<()> {
    handle.start_snapshot().await?;
    info!("Snapshot requested, waiting for data");

    let session = tokio::select! {
        session = handle.wait_for_terminal() => session?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, cancelling snapshot...");
            handle.cancel().await?;
            handle.session()
        }
    };

    if session.status != CaptureStatus::Complete {
        let reason = session
            .reason
            .map(|r| r.to_string())
            .unwrap_or_else(|| session.status.to_string());
        bail!("snapshot did not complete: {}", reason);
    }

    let path = export_path(args.out, config, CaptureMode::Snapshot);
    handle.export_snapshot(&path)?;
    println!("{}", path.display());
    Ok(())
}

async fn run_log(handle: &EngineHandle, config: &Config, args: LogArgs) -> Result<()> {
    let channels = if args.channels.is_empty() {
        config.stream.channels.clone()
    } else {
        args.channels
    };
    if let Some(bad) = channels.iter().find(|c| !is_valid_channel_name(c)) {
        bail!("invalid channel name '{}'", bad);
    }
    let interval_ms = args.interval_ms.unwrap_or(config.stream.interval_ms);
    if !(1..=60_000).contains(&interval_ms) {
        bail!("--interval-ms must be between 1 and 60000");
    }

    handle.start_stream(channels.clone(), interval_ms).await?;
    info!(
        "Logging [{}] every {} ms, press Ctrl+C to stop",
        channels.join(", "),
        interval_ms
    );

    let limit = async {
        match args.duration_s {
            Some(secs) => sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };

    let session = tokio::select! {
        session = handle.wait_for_terminal() => session?,
        _ = limit => {
            handle.stop_if_active().await?;
            handle.session()
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, stopping log stream...");
            handle.stop_if_active().await?;
            handle.session()
        }
    };

    if let Some(reason) = &session.reason {
        info!("Log session ended: {}", reason);
    }

    let records = handle.stream_records();
    if records.records.is_empty() {
        bail!("no log records received");
    }

    let path = export_path(args.out, config, CaptureMode::Stream);
    handle.export_stream(&path)?;
    println!("{}", path.display());

    if session.status == CaptureStatus::Failed {
        bail!("log stream failed after {} records", session.accepted);
    }
    Ok(())
}

async fn run_send(handle: &EngineHandle, args: SendArgs) -> Result<()> {
    let mut traffic = handle.traffic();
    handle
        .send_command(Command::Raw(args.command.join(" ")))
        .await?;

    let listen = Duration::from_millis(args.listen_ms);
    let mut stdout = std::io::stdout();
    let _ = timeout(listen, echo_replies(&mut traffic, &mut stdout)).await;
    println!();
    Ok(())
}

/// Print received traffic until the tap closes
async fn echo_replies<W: Write>(
    traffic: &mut broadcast::Receiver<TrafficEvent>,
    out: &mut W,
) -> std::io::Result<()> {
    loop {
        match traffic.recv().await {
            Ok(event) if event.direction == Direction::Rx => {
                write!(out, "{}", event.text)?;
                out.flush()?;
            }
            Ok(_) => {}
            Err(RecvError::Lagged(missed)) => warn!("Console echo skipped {} chunks", missed),
            Err(RecvError::Closed) => return Ok(()),
        }
    }
}

async fn run_estop(handle: &EngineHandle) -> Result<()> {
    handle.emergency_stop().await?;
    info!("Emergency stop sent");
    Ok(())
}
