//! Serial monitor command implementation.
//!
//! The session's reader thread prints received lines; the main thread edits
//! the outgoing line and sends it on Enter.
//!
//! Channel policy:
//! - TTY mode: received lines, the input line and status lines all go to
//!   stderr so they stay in order on one terminal.
//! - non-TTY mode: received lines go to stdout, status lines to stderr, and
//!   stdin lines are sent as they arrive.

use anyhow::{Context, Result};
use console::style;
use log::{debug, warn};
use serialterm::{Error as SessionError, NativePortOpener, SerialSession, SessionOptions};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, IsTerminal, Write as _};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::{Config, MonitorConfig};
use crate::{Cli, CliError, connect_session, get_port, resolve_baud, use_fancy_output, was_interrupted};

/// Prompt shown in front of the line being typed.
const PROMPT: &str = "> ";

/// Monitor options from the command line.
#[derive(Debug, Default)]
pub(crate) struct MonitorArgs {
    pub(crate) timestamp: bool,
    pub(crate) log_file: Option<PathBuf>,
    pub(crate) delimiter: Option<String>,
    pub(crate) max_line_length: Option<usize>,
    pub(crate) dtr: Option<bool>,
    pub(crate) rts: Option<bool>,
}

/// Build session options from flags, falling back to the config file.
pub(crate) fn session_options(args: &MonitorArgs, config: &MonitorConfig) -> SessionOptions {
    let mut options = SessionOptions::default();

    if let Some(delimiter) = args
        .delimiter
        .as_ref()
        .or(config.delimiter.as_ref())
        .filter(|d| !d.is_empty())
    {
        options.delimiter = delimiter
            .as_bytes()
            .to_vec();
    }

    match args
        .max_line_length
        .or(config.max_line_length)
    {
        Some(0) => options.max_line_length = None,
        Some(max) => options.max_line_length = Some(max),
        None => {},
    }

    options.dtr = args.dtr.or(config.dtr);
    options.rts = args.rts.or(config.rts);
    options
}

/// Byte sent for Ctrl+`key`, following the ASCII control-code table
/// (Ctrl+D is EOT, Ctrl+] is GS).
pub(crate) fn control_byte(key: char) -> Option<u8> {
    match key.to_ascii_uppercase() {
        c @ '@'..='_' => u8::try_from(c)
            .ok()
            .map(|b| b - b'@'),
        '?' => Some(0x7F),
        _ => None,
    }
}

/// `HH:MM:SS.mmm` (UTC) for a point in time.
pub(crate) fn clock_stamp(at: SystemTime) -> String {
    let since_epoch = at
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let total_secs = since_epoch.as_secs();
    let millis = since_epoch.subsec_millis();
    let hours = (total_secs / 3600) % 24;
    let minutes = (total_secs / 60) % 60;
    let seconds = total_secs % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
}

/// Prepare a received line for display. Trailing `\r` from CRLF devices is
/// dropped so it cannot move the cursor.
pub(crate) fn format_line(line: &str, stamp: Option<&str>) -> String {
    let line = line
        .strip_suffix('\r')
        .unwrap_or(line);
    match stamp {
        Some(stamp) => format!("{} {line}", style(format!("[{stamp}]")).dim()),
        None => line.to_string(),
    }
}

/// Terminal output shared by the reader thread and the input loop.
struct Screen {
    tty_mode: bool,
    show_timestamp: AtomicBool,
    // Guards the terminal as well as the input buffer
    input: Mutex<String>,
    log_file: Option<Mutex<File>>,
    log_failed: AtomicBool,
}

impl Screen {
    fn input(&self) -> std::sync::MutexGuard<'_, String> {
        self.input
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Print a received line.
    fn data_line(&self, line: &str) {
        if let Some(log) = &self.log_file {
            let written = writeln!(
                log.lock()
                    .unwrap_or_else(PoisonError::into_inner),
                "{line}"
            );
            // Report the first failure only; the capture is incomplete from here on
            if let Err(e) = written {
                if !self
                    .log_failed
                    .swap(true, Ordering::Relaxed)
                {
                    warn!("Failed to write log file: {e}");
                    self.status(&format!(
                        "{} Log file write failed, capture is incomplete: {e}",
                        style("⚠").yellow()
                    ));
                }
            }
        }

        let stamp = self
            .show_timestamp
            .load(Ordering::Relaxed)
            .then(|| clock_stamp(SystemTime::now()));
        let text = format_line(line, stamp.as_deref());

        let input = self.input();
        if self.tty_mode {
            eprint!("\r\x1b[2K{text}\r\n{PROMPT}{input}");
            io::stderr().flush().ok();
        } else {
            println!("{text}");
            io::stdout().flush().ok();
        }
    }

    /// Print a status line on stderr.
    fn status(&self, message: &str) {
        let input = self.input();
        if self.tty_mode {
            eprint!("\r\x1b[2K{message}\r\n{PROMPT}{input}");
        } else {
            eprintln!("{message}");
        }
        io::stderr().flush().ok();
    }

    fn redraw(&self, input: &str) {
        eprint!("\r\x1b[2K{PROMPT}{input}");
        io::stderr().flush().ok();
    }

    fn push(&self, c: char) {
        let mut input = self.input();
        input.push(c);
        self.redraw(&input);
    }

    fn pop(&self) {
        let mut input = self.input();
        input.pop();
        self.redraw(&input);
    }

    fn clear(&self) {
        let mut input = self.input();
        input.clear();
        self.redraw(&input);
    }

    fn take(&self) -> String {
        let mut input = self.input();
        let line = std::mem::take(&mut *input);
        self.redraw(&input);
        line
    }

    /// Flip timestamps, returning the new setting.
    fn toggle_timestamp(&self) -> bool {
        !self
            .show_timestamp
            .fetch_xor(true, Ordering::Relaxed)
    }
}

fn icon(fancy: &'static str, plain: &'static str) -> &'static str {
    if use_fancy_output() { fancy } else { plain }
}

fn open_log_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {}", path.display()))
}

/// Run the serial monitor.
///
/// - Reader thread (inside the session): serial → terminal
/// - Main thread: keyboard (crossterm raw mode) or stdin → serial
/// - Enter: send the typed line
/// - Ctrl+T: toggle timestamp display
/// - Ctrl+C: exit
/// - other Ctrl+key: send the control byte as is
pub(crate) fn cmd_monitor(
    cli: &Cli,
    config: &mut Config,
    registry: &serialterm::PortRegistry,
    args: &MonitorArgs,
) -> Result<()> {
    let port = get_port(cli, config, registry)?;
    let baud = resolve_baud(cli.baud, config);
    let options = session_options(args, &config.monitor);
    let tty_mode = io::stdin().is_terminal() && io::stderr().is_terminal();

    let log_path = args
        .log_file
        .clone()
        .or_else(|| {
            config
                .monitor
                .log_file
                .clone()
        });
    let log_file = log_path
        .as_deref()
        .map(open_log_file)
        .transpose()?;

    let screen = Arc::new(Screen {
        tty_mode,
        show_timestamp: AtomicBool::new(
            args.timestamp
                || config
                    .monitor
                    .timestamp
                    .unwrap_or(false),
        ),
        input: Mutex::new(String::new()),
        log_file: log_file.map(Mutex::new),
        log_failed: AtomicBool::new(false),
    });
    let device_lost = Arc::new(AtomicBool::new(false));

    let mut session = SerialSession::with_options(NativePortOpener, options)
        .map_err(|e| CliError::Usage(e.to_string()))?;

    {
        let screen = Arc::clone(&screen);
        session.on_data(move |line| screen.data_line(line));
    }
    {
        let screen = Arc::clone(&screen);
        let port = port.clone();
        session.on_connected(move || {
            screen.status(&format!(
                "{} Connected to {} at {baud} baud",
                icon("📡", "*"),
                style(&port).green()
            ));
        });
    }
    {
        let screen = Arc::clone(&screen);
        session.on_disconnected(move || {
            screen.status(&format!("{} Disconnected", icon("👋", "*")));
        });
    }
    {
        let screen = Arc::clone(&screen);
        let device_lost = Arc::clone(&device_lost);
        session.on_error(move |err| {
            if matches!(err, SessionError::TransportClosed(_)) {
                device_lost.store(true, Ordering::SeqCst);
            }
            screen.status(&format!("{} {err}", style("⚠").yellow()));
        });
    }

    connect_session(&mut session, &port, baud)?;

    if let Some(path) = &log_path {
        screen.status(&format!(
            "{} Logging to {}",
            icon("📝", "*"),
            path.display()
        ));
    }
    if !cli.quiet {
        screen.status(
            &style("Enter sends the line. Ctrl+T toggles timestamps and Ctrl+C exits; other Ctrl keys go to the device")
                .dim()
                .to_string(),
        );
    }

    let result = if tty_mode {
        run_line_editor(&mut session, &screen, &device_lost)
    } else {
        run_stdin_lines(&mut session, &device_lost);
        Ok(())
    };

    if let Err(e) = session.disconnect() {
        debug!("Disconnect reported: {e}");
    }
    if tty_mode {
        eprint!("\r\x1b[2K");
    }
    result?;

    if device_lost.load(Ordering::SeqCst) {
        return Err(CliError::Device(format!("Connection to {port} was lost")).into());
    }
    Ok(())
}

/// Main loop for an interactive terminal.
fn run_line_editor(session: &mut SerialSession, screen: &Screen, device_lost: &AtomicBool) -> Result<()> {
    use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
    use crossterm::terminal;

    terminal::enable_raw_mode().context("Failed to enable raw terminal mode")?;

    // Ensure we restore terminal on exit (even on panic)
    let _raw_guard = RawModeGuard;
    screen.redraw("");

    while !was_interrupted() && !device_lost.load(Ordering::SeqCst) {
        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        let Event::Key(KeyEvent {
            code,
            modifiers,
            kind,
            ..
        }) = event::read()?
        else {
            continue;
        };
        if kind == KeyEventKind::Release {
            continue;
        }

        match (code, modifiers) {
            // Ctrl+C: exit
            (KeyCode::Char('c'), KeyModifiers::CONTROL) => break,
            // Ctrl+T: toggle timestamp
            (KeyCode::Char('t'), KeyModifiers::CONTROL) => {
                let state = if screen.toggle_timestamp() {
                    "Timestamps on"
                } else {
                    "Timestamps off"
                };
                screen.status(&format!("{} {state}", icon("⏱", "*")));
            },
            (KeyCode::Enter, _) => {
                let line = screen.take();
                // A failed write was already reported by the error callback
                session.send(&line);
            },
            (KeyCode::Char(c), KeyModifiers::CONTROL) => {
                if let Some(byte) = control_byte(c) {
                    session.send_bytes(&[byte]);
                }
            },
            (KeyCode::Backspace, _) => screen.pop(),
            (KeyCode::Esc, _) => screen.clear(),
            (KeyCode::Char(c), KeyModifiers::NONE | KeyModifiers::SHIFT) => screen.push(c),
            _ => {},
        }
    }

    Ok(())
}

/// Main loop when stdin is not a terminal: forward each stdin line. After
/// EOF the monitor keeps printing until Ctrl+C.
fn run_stdin_lines(session: &mut SerialSession, device_lost: &AtomicBool) {
    let (tx, rx) = mpsc::channel::<String>();
    std::thread::spawn(move || {
        for line in io::stdin()
            .lock()
            .lines()
        {
            let Ok(line) = line else {
                break;
            };
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    let mut stdin_open = true;
    while !was_interrupted() && !device_lost.load(Ordering::SeqCst) {
        if !stdin_open {
            std::thread::sleep(Duration::from_millis(50));
            continue;
        }
        match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(line) => {
                session.send(&line);
            },
            Err(mpsc::RecvTimeoutError::Timeout) => {},
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                debug!("stdin closed");
                stdin_open = false;
            },
        }
    }
}

/// RAII guard to restore terminal mode on drop.
struct RawModeGuard;

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = crossterm::terminal::disable_raw_mode();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn screen(log_file: Option<File>) -> Screen {
        Screen {
            tty_mode: false,
            show_timestamp: AtomicBool::new(false),
            input: Mutex::new(String::new()),
            log_file: log_file.map(Mutex::new),
            log_failed: AtomicBool::new(false),
        }
    }

    #[test]
    fn test_clock_stamp() {
        let at = UNIX_EPOCH + Duration::from_millis(3_661_500);
        assert_eq!(clock_stamp(at), "01:01:01.500");
        assert_eq!(clock_stamp(UNIX_EPOCH), "00:00:00.000");
    }

    #[test]
    fn test_clock_stamp_wraps_at_midnight() {
        let at = UNIX_EPOCH + Duration::from_secs(86_400 + 59);
        assert_eq!(clock_stamp(at), "00:00:59.000");
    }

    #[test]
    fn test_format_line_drops_trailing_cr() {
        assert_eq!(format_line("Hello\r", None), "Hello");
        assert_eq!(format_line("a\rb", None), "a\rb");
        assert_eq!(format_line("", None), "");
    }

    #[test]
    fn test_format_line_with_stamp() {
        console::set_colors_enabled(false);
        assert_eq!(
            format_line("boot ok\r", Some("12:00:00.001")),
            "[12:00:00.001] boot ok"
        );
    }

    #[test]
    fn test_session_options_defaults() {
        let options = session_options(&MonitorArgs::default(), &MonitorConfig::default());
        assert_eq!(options, SessionOptions::default());
    }

    #[test]
    fn test_session_options_flags_override_config() {
        let config = MonitorConfig {
            delimiter: Some("\r\n".to_string()),
            max_line_length: Some(128),
            ..Default::default()
        };
        let args = MonitorArgs {
            delimiter: Some(";".to_string()),
            ..Default::default()
        };

        let options = session_options(&args, &config);
        assert_eq!(options.delimiter, b";");
        assert_eq!(options.max_line_length, Some(128));
    }

    #[test]
    fn test_session_options_zero_disables_cap() {
        let args = MonitorArgs {
            max_line_length: Some(0),
            ..Default::default()
        };
        let options = session_options(&args, &MonitorConfig::default());
        assert_eq!(options.max_line_length, None);
    }

    #[test]
    fn test_session_options_ignores_empty_config_delimiter() {
        let config = MonitorConfig {
            delimiter: Some(String::new()),
            ..Default::default()
        };
        let options = session_options(&MonitorArgs::default(), &config);
        assert_eq!(options.delimiter, b"\n");
    }

    #[test]
    fn test_session_options_control_lines() {
        let config = MonitorConfig {
            dtr: Some(true),
            rts: Some(true),
            ..Default::default()
        };
        let args = MonitorArgs {
            rts: Some(false),
            ..Default::default()
        };

        let options = session_options(&args, &config);
        assert_eq!(options.dtr, Some(true));
        assert_eq!(options.rts, Some(false));
    }

    #[test]
    fn test_control_byte() {
        assert_eq!(control_byte('d'), Some(0x04));
        assert_eq!(control_byte('D'), Some(0x04));
        assert_eq!(control_byte('a'), Some(0x01));
        assert_eq!(control_byte(']'), Some(0x1D));
        assert_eq!(control_byte('@'), Some(0x00));
        assert_eq!(control_byte('?'), Some(0x7F));
        assert_eq!(control_byte('1'), None);
        assert_eq!(control_byte('é'), None);
    }

    #[test]
    fn test_toggle_timestamp() {
        let screen = screen(None);
        assert!(screen.toggle_timestamp());
        assert!(!screen.toggle_timestamp());
    }

    #[test]
    fn test_data_line_appends_to_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.log");
        let screen = screen(Some(open_log_file(&path).unwrap()));
        screen
            .show_timestamp
            .store(true, Ordering::Relaxed);

        screen.data_line("first\r");
        screen.data_line("second");
        drop(screen);

        // Log keeps the raw line, without display formatting
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "first\r\nsecond\n");
    }

    #[test]
    fn test_log_write_failure_is_reported_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.log");
        std::fs::write(&path, "").unwrap();

        // Read-only handle: every write fails
        let screen = screen(Some(File::open(&path).unwrap()));
        screen.data_line("lost");
        assert!(screen.log_failed.load(Ordering::Relaxed));

        screen.data_line("also lost");
        assert!(screen.log_failed.load(Ordering::Relaxed));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }
}
