//! Command-line interface for sockexec.
use std::{ffi::OsString, path::PathBuf, str::FromStr};

use clap::Parser;
use tracing::level_filters::LevelFilter;

use crate::{
    privilege::{DEFAULT_GID, DEFAULT_UID},
    runtime::DEFAULT_SOCKET_DIR,
};

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let level = match trimmed.to_ascii_lowercase().as_str() {
            "off" => LevelFilter::OFF,
            "error" | "err" => LevelFilter::ERROR,
            "warn" | "warning" => LevelFilter::WARN,
            "info" => LevelFilter::INFO,
            "debug" => LevelFilter::DEBUG,
            "trace" => LevelFilter::TRACE,
            _ => return Err(format!("invalid log level '{trimmed}'")),
        };

        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for sockexec.
#[derive(Parser, Debug)]
#[command(name = "sockexec", version)]
#[command(
    about = "Run a program while holding a unix socket that marks it as running",
    long_about = "Creates <socket-dir>/$RC_SVCNAME.sock, runs PROGRAM, and removes the \
                  socket when PROGRAM exits. Exits with PROGRAM's exit code, 128+N if it \
                  was killed by signal N, 125 on setup failure, 126/127 if PROGRAM could \
                  not be executed or found. When started as root it first switches to \
                  --uid/--gid (1/1 by default) unless --keep-privileges is given."
)]
pub struct Cli {
    /// Directory holding the lock sockets.
    #[arg(long, value_name = "DIR", default_value = DEFAULT_SOCKET_DIR)]
    pub socket_dir: PathBuf,

    /// Exit successfully instead of failing when the service is already running.
    #[arg(long)]
    pub allow_running: bool,

    /// Stay root instead of switching to --uid/--gid when started as root.
    #[arg(long = "keep-privileges")]
    pub keep_privileges: bool,

    /// User id to switch to when started as root.
    #[arg(long, value_name = "UID", default_value_t = DEFAULT_UID)]
    pub uid: u32,

    /// Group id to switch to when started as root.
    #[arg(long, value_name = "GID", default_value_t = DEFAULT_GID)]
    pub gid: u32,

    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<LogLevelArg>,

    /// Program to run, followed by its arguments.
    #[arg(
        value_name = "PROGRAM",
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<OsString>,
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
