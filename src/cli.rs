use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "mesc-capture",
    version,
    about = "Capture phase snapshots and telemetry from a MESC motor controller",
    long_about = "Talks to the MESC firmware console over serial. Captures the 600-sample\n\
                  phase snapshot or a live JSON log stream and exports it as CSV."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (defaults to ./mesc-capture.toml if present)
    #[arg(short, long, global = true, env = "MESC_CAPTURE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Serial device, or "auto" to probe the usual paths
    #[arg(short, long, global = true)]
    pub port: Option<String>,

    /// Baud rate
    #[arg(short, long, global = true)]
    pub baud: Option<u32>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Capture one phase snapshot and export it
    Snapshot(SnapshotArgs),
    /// Stream log channels until stopped and export them
    Log(LogArgs),
    /// Send a raw console command and print the reply
    Send(SendArgs),
    /// Zero the UART current requests
    Estop,
}

#[derive(Args)]
pub struct SnapshotArgs {
    /// Output CSV path (defaults to a timestamped file in the export dir)
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

#[derive(Args)]
pub struct LogArgs {
    /// Channel to log; repeat for several (defaults to the configured set)
    #[arg(long = "channel", value_name = "NAME")]
    pub channels: Vec<String>,

    /// Log interval in milliseconds
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Stop after this many seconds (runs until Ctrl+C otherwise)
    #[arg(long)]
    pub duration_s: Option<u64>,

    /// Output CSV path (defaults to a timestamped file in the export dir)
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

#[derive(Args)]
pub struct SendArgs {
    /// Console command words, joined with spaces
    #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,

    /// How long to print the reply, in milliseconds
    #[arg(long, default_value_t = 500)]
    pub listen_ms: u64,
}
