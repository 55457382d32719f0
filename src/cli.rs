//! Command-line interface for avatalk
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Talking avatar conversation loop
#[derive(Parser, Debug)]
#[command(name = "avatalk", version, about = "Talking avatar conversation loop")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Verbose output (-v: debug, -vv: trace). RUST_LOG takes precedence
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Audio input device (see `avatalk devices`)
    #[arg(long, value_name = "DEVICE")]
    pub device: Option<String>,

    /// Audio output device for the avatar's voice
    #[arg(long, value_name = "DEVICE")]
    pub output_device: Option<String>,

    /// Directory for recorded.wav and reply.wav
    #[arg(long, value_name = "DIR", conflicts_with = "no_artifacts")]
    pub artifacts: Option<PathBuf>,

    /// Do not write recorded.wav and reply.wav
    #[arg(long)]
    pub no_artifacts: bool,

    /// Frame interval of the tick loop. Examples: 16ms, 33ms
    #[arg(long, value_name = "DURATION", default_value = "16ms", value_parser = parse_duration)]
    pub tick: Duration,

    /// Per-request timeout for the cloud services. Examples: 30s, 1m
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub request_timeout: Option<Duration>,
}

/// Parse a duration string.
///
/// Supports any format accepted by `humantime` (`16ms`, `30s`, `1m30s`)
/// and bare numbers, read as seconds.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let duration = match s.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => humantime::parse_duration(s).map_err(|e| e.to_string())?,
    };
    if duration.is_zero() {
        return Err("duration must be greater than zero".to_string());
    }
    Ok(duration)
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List available audio input devices
    Devices,

    /// Print the effective configuration (API keys redacted)
    Config,
}
