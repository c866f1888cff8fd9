//! serialterm CLI - Command-line serial terminal.
//!
//! ## Features
//!
//! - List USB serial ports, once or continuously
//! - Line-oriented serial monitor with timestamps and log files
//! - One-shot sending of lines to a device
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use serialterm::{ConnectionSettings, PortRegistry, SerialSession};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

mod commands;
mod config;
mod serial;

use config::Config;
use serial::{PortSource, SerialOptions, ask_remember_port, select_serial_port};

/// Baud rate used when neither flags, environment nor config set one.
const DEFAULT_BAUD: u32 = 9600;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl+C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/colors should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl+C was pressed outside raw mode.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Sleep for `total`, returning early on Ctrl+C.
pub(crate) fn sleep_interruptible(total: Duration) {
    let deadline = Instant::now() + total;
    while !was_interrupted() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(50)));
    }
}

/// Failure classes with a dedicated process exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or setup: invalid settings, no or ambiguous port.
    #[error("{0}")]
    Usage(String),
    /// Configuration could not be loaded.
    #[error("{0}")]
    Config(String),
    /// The device could not be opened or went away.
    #[error("{0}")]
    Device(String),
    /// The user cancelled.
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Config(_) => 3,
            Self::Device(_) => 4,
            Self::Cancelled(_) => 130,
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<CliError>()
        .map_or(1, CliError::exit_code)
}

/// serialterm - A cross-platform serial terminal.
///
/// Environment variables:
///   SERIALTERM_PORT              - Default serial port
///   SERIALTERM_BAUD              - Default baud rate (default: 9600)
///   SERIALTERM_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "serialterm")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "SERIALTERM_PORT")]
    port: Option<String>,

    /// Baud rate (default: 9600).
    #[arg(short, long, global = true, env = "SERIALTERM_BAUD", value_parser = parse_baud)]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "SERIALTERM_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Confirm port selection even for auto-detected ports.
    #[arg(long, global = true)]
    confirm_port: bool,

    /// Include ports without a USB device identifier.
    #[arg(long, global = true)]
    list_all_ports: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,

        /// Keep polling and report ports as they appear and disappear.
        #[arg(long)]
        watch: bool,
    },

    /// Open an interactive serial monitor.
    Monitor {
        /// Prefix received lines with a timestamp (toggle with Ctrl+T).
        #[arg(long)]
        timestamp: bool,

        /// Append received lines to a file.
        #[arg(long, value_name = "PATH")]
        log_file: Option<PathBuf>,

        /// Inbound line delimiter; accepts \n, \r, \t, \0 and \\ escapes (default: \n).
        #[arg(long, value_parser = parse_delimiter)]
        delimiter: Option<String>,

        /// Split lines longer than this many bytes (0 disables).
        #[arg(long, value_name = "BYTES")]
        max_line_length: Option<usize>,

        /// Set DTR after opening (on/off); boards that reset on DTR need off.
        #[arg(long, value_name = "on|off", action = clap::ArgAction::Set,
              value_parser = clap::builder::BoolishValueParser::new())]
        dtr: Option<bool>,

        /// Set RTS after opening (on/off).
        #[arg(long, value_name = "on|off", action = clap::ArgAction::Set,
              value_parser = clap::builder::BoolishValueParser::new())]
        rts: Option<bool>,
    },

    /// Send lines to a device and exit.
    Send {
        /// Lines to send; each one is followed by "\n\r".
        #[arg(required = true)]
        text: Vec<String>,

        /// Print received lines for this many milliseconds before closing.
        #[arg(long, value_name = "MS", default_value_t = 0)]
        wait: u64,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type (detected from $SHELL if not specified).
        #[arg(value_enum)]
        shell: Option<Shell>,
    },
}

/// Parse a baud rate argument.
fn parse_baud(s: &str) -> Result<u32, String> {
    ConnectionSettings::parse_baud(s).map_err(|e| e.to_string())
}

/// Parse a delimiter argument, resolving backslash escapes.
fn parse_delimiter(s: &str) -> Result<String, String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some(other) => return Err(format!("Unknown escape sequence: \\{other}")),
            None => return Err("Trailing backslash in delimiter".to_string()),
        }
    }

    if out.is_empty() {
        return Err("Delimiter must not be empty".to_string());
    }
    Ok(out)
}

fn init_logging(verbose: u8, quiet: bool) {
    let log_level = if quiet {
        "warn"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(verbose >= 2)
        .format_timestamp(if verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var_os("NO_COLOR").is_some() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    debug!(
        "serialterm v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst)) {
        debug!("Could not install Ctrl+C handler: {e}");
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config_path {
        Some(path) if !path.exists() => Err(CliError::Config(format!(
            "Config file not found: {}",
            path.display()
        ))
        .into()),
        Some(path) => Ok(Config::load_from_path(path)),
        None => Ok(Config::load()),
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = load_config(cli)?;
    let registry = PortRegistry::native();

    match &cli.command {
        Commands::ListPorts { json, watch } => {
            commands::ports::cmd_list_ports(cli, &registry, *json, *watch)
        },
        Commands::Monitor {
            timestamp,
            log_file,
            delimiter,
            max_line_length,
            dtr,
            rts,
        } => {
            let args = commands::monitor::MonitorArgs {
                timestamp: *timestamp,
                log_file: log_file.clone(),
                delimiter: delimiter.clone(),
                max_line_length: *max_line_length,
                dtr: *dtr,
                rts: *rts,
            };
            commands::monitor::cmd_monitor(cli, &mut config, &registry, &args)
        },
        Commands::Send { text, wait } => commands::send::cmd_send(
            cli,
            &mut config,
            &registry,
            text,
            Duration::from_millis(*wait),
        ),
        Commands::Completions { shell } => commands::completions::cmd_completions(*shell),
    }
}

/// Get serial port from CLI args, config or interactive selection.
pub(crate) fn get_port(cli: &Cli, config: &mut Config, registry: &PortRegistry) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        list_all_ports: cli.list_all_ports,
        non_interactive: cli.non_interactive,
        confirm_port: cli.confirm_port,
    };

    let selected = select_serial_port(&options, config, registry)?;

    // Offer to remember ports the user had to pick by hand
    if selected.source == PortSource::Prompted && !cli.non_interactive {
        ask_remember_port(&selected.port, config)?;
    }

    Ok(selected.port.path)
}

/// Effective baud rate: flag or environment (`requested`), then config, then
/// the default.
pub(crate) fn resolve_baud(requested: Option<u32>, config: &Config) -> u32 {
    requested
        .or(config.connection.baud)
        .unwrap_or(DEFAULT_BAUD)
}

/// Connect `session`, classifying failures for the exit code.
pub(crate) fn connect_session(session: &mut SerialSession, port: &str, baud: u32) -> Result<()> {
    session
        .connect(port, baud)
        .map_err(|e| -> anyhow::Error {
            match e {
                serialterm::Error::Validation(_) => CliError::Usage(e.to_string()).into(),
                _ => CliError::Device(e.to_string()).into(),
            }
        })
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    // ---- clap validation ----

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_list_ports() {
        let cli = Cli::try_parse_from(["serialterm", "list-ports"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::ListPorts {
                json: false,
                watch: false
            }
        ));
    }

    #[test]
    fn test_cli_parse_list_ports_json_watch() {
        let cli = Cli::try_parse_from(["serialterm", "list-ports", "--json", "--watch"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::ListPorts {
                json: true,
                watch: true
            }
        ));
    }

    #[test]
    fn test_cli_parse_monitor() {
        let cli = Cli::try_parse_from([
            "serialterm",
            "-p",
            "/dev/ttyUSB0",
            "-b",
            "115200",
            "monitor",
            "--timestamp",
            "--log-file",
            "out.log",
            "--delimiter",
            "\\r\\n",
            "--max-line-length",
            "0",
            "--dtr",
            "off",
        ])
        .unwrap();

        assert_eq!(cli.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(cli.baud, Some(115200));
        match cli.command {
            Commands::Monitor {
                timestamp,
                log_file,
                delimiter,
                max_line_length,
                dtr,
                rts,
            } => {
                assert!(timestamp);
                assert_eq!(log_file, Some(PathBuf::from("out.log")));
                assert_eq!(delimiter.as_deref(), Some("\r\n"));
                assert_eq!(max_line_length, Some(0));
                assert_eq!(dtr, Some(false));
                assert_eq!(rts, None);
            },
            _ => panic!("expected monitor"),
        }
    }

    #[test]
    fn test_cli_parse_send() {
        let cli = Cli::try_parse_from(["serialterm", "send", "help", "version", "--wait", "500"])
            .unwrap();
        match cli.command {
            Commands::Send { text, wait } => {
                assert_eq!(text, vec!["help", "version"]);
                assert_eq!(wait, 500);
            },
            _ => panic!("expected send"),
        }
    }

    #[test]
    fn test_cli_send_requires_text() {
        assert!(Cli::try_parse_from(["serialterm", "send"]).is_err());
    }

    #[test]
    fn test_cli_parse_completions() {
        let cli = Cli::try_parse_from(["serialterm", "completions", "bash"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Completions {
                shell: Some(Shell::Bash)
            }
        ));
    }

    #[test]
    fn test_cli_global_options_after_subcommand() {
        let cli = Cli::try_parse_from([
            "serialterm",
            "list-ports",
            "--list-all-ports",
            "--non-interactive",
            "-vv",
            "--config",
            "custom.toml",
        ])
        .unwrap();
        assert!(cli.list_all_ports);
        assert!(cli.non_interactive);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config_path, Some(PathBuf::from("custom.toml")));
    }

    #[test]
    fn test_cli_rejects_invalid_baud() {
        for bad in ["0", "-1", "fast", "96.5"] {
            assert!(
                Cli::try_parse_from(["serialterm", "-b", bad, "list-ports"]).is_err(),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_cli_missing_subcommand() {
        assert!(Cli::try_parse_from(["serialterm"]).is_err());
    }

    // ---- value parsers ----

    #[test]
    fn test_parse_delimiter_escapes() {
        assert_eq!(parse_delimiter("\\n").unwrap(), "\n");
        assert_eq!(parse_delimiter("\\r\\n").unwrap(), "\r\n");
        assert_eq!(parse_delimiter("\\t;").unwrap(), "\t;");
        assert_eq!(parse_delimiter("\\\\").unwrap(), "\\");
        assert_eq!(parse_delimiter("END").unwrap(), "END");
    }

    #[test]
    fn test_parse_delimiter_rejects_bad_input() {
        assert!(parse_delimiter("").is_err());
        assert!(parse_delimiter("\\").is_err());
        assert!(parse_delimiter("\\q").is_err());
    }

    // ---- helpers ----

    #[test]
    fn test_resolve_baud_precedence() {
        let mut config = Config::default();
        assert_eq!(resolve_baud(None, &config), DEFAULT_BAUD);

        config.connection.baud = Some(57600);
        assert_eq!(resolve_baud(None, &config), 57600);
        assert_eq!(resolve_baud(Some(115200), &config), 115200);
    }

    #[test]
    fn test_baud_flag_reaches_resolution() {
        let cli = Cli::try_parse_from(["serialterm", "-b", "115200", "list-ports"]).unwrap();
        assert_eq!(resolve_baud(cli.baud, &Config::default()), 115200);
    }

    #[test]
    fn test_exit_codes() {
        let usage: anyhow::Error = CliError::Usage("x".into()).into();
        let config: anyhow::Error = CliError::Config("x".into()).into();
        let device: anyhow::Error = CliError::Device("x".into()).into();
        let cancelled: anyhow::Error = CliError::Cancelled("x".into()).into();
        let other = anyhow::anyhow!("boom");

        assert_eq!(exit_code_for(&usage), 2);
        assert_eq!(exit_code_for(&config), 3);
        assert_eq!(exit_code_for(&device), 4);
        assert_eq!(exit_code_for(&cancelled), 130);
        assert_eq!(exit_code_for(&other), 1);
    }

    #[test]
    fn test_exit_code_survives_context() {
        use anyhow::Context as _;
        let err = Err::<(), _>(CliError::Device("gone".into()))
            .context("while sending")
            .unwrap_err();
        assert_eq!(exit_code_for(&err), 4);
    }
}
