//! vexflash CLI - Command-line tool for uploading programs to VEX PIC
//! controllers.
//!
//! ## Features
//!
//! - Upload Intel HEX programs through the serial bootloader
//! - Read back program memory for diagnostics
//! - Inspect a HEX file without touching hardware
//! - Programming-cable detection and interactive port selection
//! - Shell completion generation
//! - Environment variable support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

mod commands;
mod config;
mod serial;

use config::Config;
use serial::{SerialOptions, ask_remember_port, select_serial_port};

/// vexflash - Upload programs to VEX PIC microcontrollers.
///
/// Environment variables:
///   VEXFLASH_PORT              - Default serial port
///   VEXFLASH_TIMEOUT           - Read timeout in seconds (default: 3)
///   VEXFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "vexflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(
    after_help = "Examples:\n  vexflash upload robot.hex\n  vexflash --port /dev/ttyUSB0 upload --yes robot.hex\n  vexflash info --json robot.hex"
)]
pub(crate) struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "VEXFLASH_PORT")]
    pub(crate) port: Option<String>,

    /// Read timeout in seconds.
    #[arg(long, global = true, value_name = "SECS", env = "VEXFLASH_TIMEOUT")]
    pub(crate) timeout: Option<u64>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "VEXFLASH_NON_INTERACTIVE")]
    pub(crate) non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub(crate) config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Erase, write and start a HEX program on the controller.
    Upload {
        /// Intel HEX file to upload.
        hex: PathBuf,

        /// The controller is already in program mode; do not ask.
        #[arg(short, long)]
        yes: bool,
    },

    /// Read program memory from the controller (diagnostic).
    Read {
        /// Start address (hex, e.g. 0x0800).
        #[arg(short, long, value_parser = parse_hex_u32)]
        address: u32,

        /// Number of bytes to read.
        #[arg(short, long, default_value = "16", value_parser = clap::value_parser!(u16).range(1..=100))]
        length: u16,
    },

    /// Show what an upload of a HEX file would do.
    Info {
        /// Intel HEX file to inspect.
        hex: PathBuf,

        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type (detected from $SHELL if omitted).
        #[arg(value_enum)]
        shell: Option<Shell>,
    },
}

/// Errors the CLI classifies itself.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation; nothing was attempted.
    #[error("{0}")]
    Usage(String),
    /// The user cancelled.
    #[error("{0}")]
    Cancelled(String),
}

const EXIT_FAILURE: u8 = 1;
const EXIT_USAGE: u8 = 2;
const EXIT_CANCELLED: u8 = 130;

/// Exit status for an error.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(cli_err) = cause.downcast_ref::<CliError>() {
            return match cli_err {
                CliError::Usage(_) => EXIT_USAGE,
                CliError::Cancelled(_) => EXIT_CANCELLED,
            };
        }
        if let Some(vexflash::Error::Interrupted) = cause.downcast_ref::<vexflash::Error>() {
            return EXIT_CANCELLED;
        }
    }
    EXIT_FAILURE
}

/// Parse hexadecimal address (supports 0x prefix and underscores).
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    let s: String = s.chars().filter(|c| *c != '_').collect();
    u32::from_str_radix(&s, 16).map_err(|e| format!("Invalid hex address: {e}"))
}

fn install_interrupt_handler() {
    let result = ctrlc::set_handler(|| {
        if INTERRUPTED.swap(true, Ordering::Relaxed) {
            std::process::exit(i32::from(EXIT_CANCELLED));
        }
        eprintln!("\nInterrupted, stopping after the current command...");
    });
    if let Err(e) = result {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    vexflash::set_interrupt_checker(was_interrupted);
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn main() -> ExitCode {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var_os("NO_COLOR").is_some() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);
    install_interrupt_handler();

    debug!(
        "vexflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Upload { hex, yes } => commands::upload::cmd_upload(cli, &mut config, hex, *yes),
        Commands::Read { address, length } => {
            commands::upload::cmd_read(cli, &mut config, *address, usize::from(*length))
        },
        Commands::Info { hex, json } => commands::info::cmd_info(hex, *json),
        Commands::ListPorts { json } => commands::info::cmd_list_ports(&config, *json),
        Commands::Completions { shell } => commands::completions::cmd_completions(*shell),
    }
}

/// Get serial port from CLI args, config or interactive selection.
pub(crate) fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        non_interactive: cli.non_interactive,
    };

    let selected = select_serial_port(&options, config)?;

    if !selected.is_cable && !cli.non_interactive && cli.port.is_none() {
        ask_remember_port(&selected.port, config)?;
    }

    Ok(selected.port.name)
}

/// Read timeout: command line, then config, then the library default.
pub(crate) fn resolve_timeout(cli: &Cli, config: &Config) -> Duration {
    cli.timeout
        .map(Duration::from_secs)
        .or_else(|| config.timeout())
        .unwrap_or(vexflash::port::DEFAULT_TIMEOUT)
}
