//! Serial session: connection lifecycle and the inbound line pipeline.
//!
//! A [`SerialSession`] owns at most one live link to a device. It walks the
//! following state machine:
//!
//! ```text
//!            configure()            open()
//!   Idle ───────────────► Configured ─────────► Open
//!    ▲                        │                 │  │
//!    │      open failure      │                 │  │ device lost
//!    ├────────────────────────┘                 │  │
//!    │                                          │  │
//!    │        close confirmed     disconnect()  │  │
//!    ├─────────────────────── Closing ◄─────────┘  │
//!    └─────────────────────────────────────────────┘
//! ```
//!
//! While `Open`, a reader thread pulls bytes from a cloned port handle,
//! splits them into lines with [`LineFramer`], decodes them as UTF-8 (lossy)
//! and removes ANSI sequences before handing each line to the data callback.
//!
//! Callbacks run on whichever thread produced the event: the caller's thread
//! for connect/disconnect/send, the reader thread for data and device loss.
//! They must not block on the session itself.
//!
//! ## Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "native")]
//! # fn main() -> serialterm::Result<()> {
//! use serialterm::SerialSession;
//!
//! let mut session = SerialSession::native();
//! session.on_data(|line| println!("{line}"));
//! session.on_error(|err| eprintln!("error: {err}"));
//!
//! session.connect("/dev/ttyUSB0", 115200)?;
//! session.send("help");
//! session.disconnect()?;
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "native"))]
//! # fn main() {}
//! ```

use std::{
    fmt,
    io::ErrorKind,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, info, trace, warn};

use crate::{
    ansi::strip_ansi,
    error::{Error, Result},
    framer::{DEFAULT_DELIMITER, DEFAULT_MAX_LINE_LENGTH, LineFramer},
    port::{DataBits, FlowControl, Parity, Port, PortOpener, SerialConfig, StopBits},
    registry::{PortDescriptor, PortRegistry},
};

/// Terminator appended to every line written by [`SerialSession::send`].
pub const LINE_TERMINATOR: &str = "\n\r";

/// Read timeout used by the reader thread between stop-flag checks.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(50);

const READ_BUFFER_SIZE: usize = 1024;

/// Device path and baud rate of a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ConnectionSettings {
    /// Device path (e.g., "/dev/ttyUSB0" or "COM3").
    pub device_path: Option<String>,
    /// Baud rate.
    pub baud_rate: Option<u32>,
}

impl ConnectionSettings {
    /// Settings with both fields present.
    pub fn new(device_path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            device_path: Some(device_path.into()),
            baud_rate: Some(baud_rate),
        }
    }

    /// Return the path and baud if a connection may be opened with them.
    pub fn validate(&self) -> Result<(&str, u32)> {
        let path = match self.device_path.as_deref() {
            Some(path) if !path.trim().is_empty() => path,
            Some(_) => return Err(Error::Validation("device path is empty".to_string())),
            None => return Err(Error::Validation("no device path set".to_string())),
        };

        match self.baud_rate {
            Some(0) => Err(Error::Validation(
                "baud rate must be greater than zero".to_string(),
            )),
            Some(baud) => Ok((path, baud)),
            None => Err(Error::Validation("no baud rate set".to_string())),
        }
    }

    /// Parse a textual baud rate. Non-integers, negatives and zero are rejected.
    pub fn parse_baud(text: &str) -> Result<u32> {
        match text.trim().parse::<u32>() {
            Ok(0) => Err(Error::Validation(
                "baud rate must be greater than zero".to_string(),
            )),
            Ok(baud) => Ok(baud),
            Err(e) => Err(Error::Validation(format!(
                "invalid baud rate '{}': {e}",
                text.trim()
            ))),
        }
    }
}

impl fmt::Display for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.device_path, self.baud_rate) {
            (Some(path), Some(baud)) => write!(f, "{path} @ {baud} baud"),
            (Some(path), None) => write!(f, "{path}"),
            (None, Some(baud)) => write!(f, "<no port> @ {baud} baud"),
            (None, None) => write!(f, "<unset>"),
        }
    }
}

/// Connection state of a [`SerialSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum SessionState {
    /// No live transport.
    #[default]
    Idle,
    /// Settings applied, transport not opened yet.
    Configured,
    /// Transport open, data flowing.
    Open,
    /// Close requested, waiting for the transport to confirm.
    Closing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Configured => "configured",
            Self::Open => "open",
            Self::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Tunables applied to every link a session opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Inbound line delimiter.
    pub delimiter: Vec<u8>,
    /// Force-flush cap for a line without delimiter; `None` disables it.
    pub max_line_length: Option<usize>,
    /// Read timeout of the reader thread.
    pub read_timeout: Duration,
    /// Data bits.
    pub data_bits: DataBits,
    /// Parity.
    pub parity: Parity,
    /// Stop bits.
    pub stop_bits: StopBits,
    /// Flow control.
    pub flow_control: FlowControl,
    /// DTR level set right after opening; `None` leaves the driver default.
    pub dtr: Option<bool>,
    /// RTS level set right after opening; `None` leaves the driver default.
    pub rts: Option<bool>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER.to_vec(),
            max_line_length: Some(DEFAULT_MAX_LINE_LENGTH),
            read_timeout: DEFAULT_READ_TIMEOUT,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            dtr: None,
            rts: None,
        }
    }
}

impl SessionOptions {
    fn framer(&self) -> Result<LineFramer> {
        LineFramer::new(self.delimiter.clone())?.with_max_line_length(self.max_line_length)
    }

    fn serial_config(&self, path: &str, baud: u32) -> SerialConfig {
        SerialConfig::new(path, baud)
            .with_timeout(self.read_timeout)
            .with_framing(self.data_bits, self.parity, self.stop_bits)
            .with_flow_control(self.flow_control)
    }
}

type DataCallback = Arc<dyn Fn(&str) + Send + Sync>;
type EventCallback = Arc<dyn Fn() + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;
type StateCallback = Arc<dyn Fn(SessionState) + Send + Sync>;

/// A full set of session callbacks. At most one callback per event.
///
/// ```rust
/// use serialterm::SessionCallbacks;
///
/// let callbacks = SessionCallbacks::default()
///     .on_data(|line| println!("{line}"))
///     .on_error(|err| eprintln!("{err}"));
/// # let _ = callbacks;
/// ```
#[derive(Clone, Default)]
pub struct SessionCallbacks {
    data: Option<DataCallback>,
    connected: Option<EventCallback>,
    disconnected: Option<EventCallback>,
    error: Option<ErrorCallback>,
    state_change: Option<StateCallback>,
}

impl SessionCallbacks {
    /// Called once per inbound line, in arrival order.
    #[must_use]
    pub fn on_data(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.data = Some(Arc::new(f));
        self
    }

    /// Called once after a link opens.
    #[must_use]
    pub fn on_connected(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.connected = Some(Arc::new(f));
        self
    }

    /// Called once after a link closes, requested or not.
    #[must_use]
    pub fn on_disconnected(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.disconnected = Some(Arc::new(f));
        self
    }

    /// Called for every failure at the transport boundary.
    #[must_use]
    pub fn on_error(mut self, f: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.error = Some(Arc::new(f));
        self
    }

    /// Called on every state transition with the new state.
    #[must_use]
    pub fn on_state_change(mut self, f: impl Fn(SessionState) + Send + Sync + 'static) -> Self {
        self.state_change = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for SessionCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCallbacks")
            .field("data", &self.data.is_some())
            .field("connected", &self.connected.is_some())
            .field("disconnected", &self.disconnected.is_some())
            .field("error", &self.error.is_some())
            .field("state_change", &self.state_change.is_some())
            .finish()
    }
}

/// State shared between the session owner and its reader thread.
#[derive(Default)]
struct Shared {
    state: Mutex<SessionState>,
    callbacks: Mutex<SessionCallbacks>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    fn set_state(&self, next: SessionState) {
        let previous = std::mem::replace(&mut *lock(&self.state), next);
        if previous != next {
            debug!("Session state: {previous} -> {next}");
            self.emit_state(next);
        }
    }

    /// Move `from` -> `to` only if the current state is `from`.
    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        {
            let mut state = lock(&self.state);
            if *state != from {
                return false;
            }
            *state = to;
        }
        debug!("Session state: {from} -> {to}");
        self.emit_state(to);
        true
    }

    fn callbacks(&self) -> MutexGuard<'_, SessionCallbacks> {
        lock(&self.callbacks)
    }

    fn emit_data(&self, line: &str) {
        let callback = self.callbacks().data.clone();
        if let Some(callback) = callback {
            callback(line);
        }
    }

    fn emit_connected(&self) {
        let callback = self.callbacks().connected.clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    fn emit_disconnected(&self) {
        let callback = self.callbacks().disconnected.clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    fn emit_error(&self, err: &Error) {
        let callback = self.callbacks().error.clone();
        if let Some(callback) = callback {
            callback(err);
        }
    }

    fn emit_state(&self, state: SessionState) {
        let callback = self.callbacks().state_change.clone();
        if let Some(callback) = callback {
            callback(state);
        }
    }
}

/// A live transport plus the reader thread draining it.
struct Link {
    port: Box<dyn Port>,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl Link {
    /// Stop the reader, close the port, then wait for the reader to exit.
    /// No callback from this link can fire once this returns.
    fn shutdown(mut self) -> Result<()> {
        self.running
            .store(false, Ordering::Release);
        let result = self.port.close();
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!("Reader thread for {} panicked", self.port.name());
            }
        }
        result
    }
}

/// Owns one serial connection and its event callbacks.
pub struct SerialSession {
    opener: Arc<dyn PortOpener>,
    options: SessionOptions,
    settings: ConnectionSettings,
    shared: Arc<Shared>,
    link: Option<Link>,
}

impl SerialSession {
    /// Create an idle session that opens ports through `opener`.
    pub fn new(opener: impl PortOpener + 'static) -> Self {
        Self {
            opener: Arc::new(opener),
            options: SessionOptions::default(),
            settings: ConnectionSettings::default(),
            shared: Arc::new(Shared::default()),
            link: None,
        }
    }

    /// Create an idle session with custom options.
    pub fn with_options(opener: impl PortOpener + 'static, options: SessionOptions) -> Result<Self> {
        // Reject a bad delimiter or cap now rather than on first connect
        options.framer()?;
        let mut session = Self::new(opener);
        session.options = options;
        Ok(session)
    }

    /// Create an idle session backed by the host serial driver.
    #[cfg(feature = "native")]
    pub fn native() -> Self {
        Self::new(crate::port::NativePortOpener)
    }

    /// Snapshot of the last applied settings.
    pub fn settings(&self) -> ConnectionSettings {
        self.settings
            .clone()
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.shared
            .state()
    }

    /// Whether data is flowing.
    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// The options every link is opened with.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Replace the whole callback set. Events without a callback in
    /// `callbacks` end up with none.
    pub fn set_callbacks(&self, callbacks: SessionCallbacks) {
        *self.shared.callbacks() = callbacks;
    }

    /// Remove every callback.
    pub fn clear_callbacks(&self) {
        self.set_callbacks(SessionCallbacks::default());
    }

    /// Set the data callback, replacing any previous one.
    pub fn on_data(&self, f: impl Fn(&str) + Send + Sync + 'static) {
        self.shared.callbacks().data = Some(Arc::new(f));
    }

    /// Set the connected callback, replacing any previous one.
    pub fn on_connected(&self, f: impl Fn() + Send + Sync + 'static) {
        self.shared.callbacks().connected = Some(Arc::new(f));
    }

    /// Set the disconnected callback, replacing any previous one.
    pub fn on_disconnected(&self, f: impl Fn() + Send + Sync + 'static) {
        self.shared.callbacks().disconnected = Some(Arc::new(f));
    }

    /// Set the error callback, replacing any previous one.
    pub fn on_error(&self, f: impl Fn(&Error) + Send + Sync + 'static) {
        self.shared.callbacks().error = Some(Arc::new(f));
    }

    /// Set the state-change callback, replacing any previous one.
    pub fn on_state_change(&self, f: impl Fn(SessionState) + Send + Sync + 'static) {
        self.shared.callbacks().state_change = Some(Arc::new(f));
    }

    /// Query `registry`, reporting a discovery failure through the error
    /// callback instead of the return value.
    pub fn discover(&self, registry: &PortRegistry) -> Vec<PortDescriptor> {
        match registry.list_ports() {
            Ok(ports) => ports,
            Err(err) => {
                self.shared
                    .emit_error(&err);
                Vec::new()
            },
        }
    }

    /// Open `path` at `baud`, replacing any link with different settings.
    ///
    /// Runs validation, the already-connected guard, teardown of the old link,
    /// [`configure`](Self::configure) and [`open`](Self::open) in that order.
    pub fn connect(&mut self, path: &str, baud: u32) -> Result<()> {
        self.configure(path, baud)?;
        self.open()
    }

    /// Apply new settings without opening the port.
    ///
    /// A link open with different settings is closed first; one open with the
    /// same settings is left alone and [`Error::AlreadyConnected`] is returned.
    pub fn configure(&mut self, path: &str, baud: u32) -> Result<()> {
        let requested = ConnectionSettings::new(path, baud);
        if let Err(e) = requested.validate() {
            warn!("Rejected settings {requested}: {e}");
            return Err(e);
        }

        self.reap_lost_link();

        if self.is_open() {
            if self.settings == requested {
                debug!("Already connected with {requested}");
                return Err(Error::AlreadyConnected {
                    path: path.to_string(),
                    baud,
                });
            }
            info!("Settings changed to {requested}, closing {}", self.settings);
            // Failures were already reported through the callbacks
            let _ = self.disconnect();
        }

        self.settings = requested;
        self.shared
            .set_state(SessionState::Configured);
        Ok(())
    }

    /// Open the port described by the configured settings.
    pub fn open(&mut self) -> Result<()> {
        match self.state() {
            SessionState::Configured => {},
            SessionState::Open => {
                let (path, baud) = self
                    .settings
                    .validate()?;
                return Err(Error::AlreadyConnected {
                    path: path.to_string(),
                    baud,
                });
            },
            state => {
                return Err(Error::Validation(format!(
                    "cannot open a session that is {state}; configure it first"
                )));
            },
        }

        let (path, baud) = self
            .settings
            .validate()?;
        let path = path.to_string();
        let config = self
            .options
            .serial_config(&path, baud);

        match self.establish(&config) {
            Ok(()) => Ok(()),
            Err(cause) => {
                let err = Error::Transport(format!("failed to open {path}: {cause}"));
                warn!("{err}");
                self.shared
                    .set_state(SessionState::Idle);
                self.shared
                    .emit_error(&err);
                Err(err)
            },
        }
    }

    /// Reopen with the last applied settings.
    pub fn reconnect(&mut self) -> Result<()> {
        let (path, baud) = self
            .settings
            .validate()?;
        let path = path.to_string();
        self.connect(&path, baud)
    }

    /// Close the link. Trivially succeeds when not open.
    ///
    /// The session ends up `Idle` even if the close fails; the failure goes to
    /// the error callback and is returned.
    pub fn disconnect(&mut self) -> Result<()> {
        if !self
            .shared
            .transition(SessionState::Open, SessionState::Closing)
        {
            self.reap_lost_link();
            return Ok(());
        }

        let result = match self.link.take() {
            Some(link) => {
                let name = link
                    .port
                    .name()
                    .to_string();
                link.shutdown()
                    .map_err(|e| Error::Transport(format!("failed to close {name}: {e}")))
            },
            None => Ok(()),
        };

        self.shared
            .set_state(SessionState::Idle);
        if let Err(ref err) = result {
            warn!("{err}");
            self.shared
                .emit_error(err);
        }
        info!("Disconnected from {}", self.settings);
        self.shared
            .emit_disconnected();
        result
    }

    /// Write `text` followed by [`LINE_TERMINATOR`].
    ///
    /// Returns `false` without side effects unless open. Write failures go to
    /// the error callback and also return `false`.
    pub fn send(&mut self, text: &str) -> bool {
        let mut payload = String::with_capacity(text.len() + LINE_TERMINATOR.len());
        payload.push_str(text);
        payload.push_str(LINE_TERMINATOR);
        self.send_bytes(payload.as_bytes())
    }

    /// Write raw bytes with the same contract as [`send`](Self::send).
    pub fn send_bytes(&mut self, data: &[u8]) -> bool {
        if !self.is_open() {
            return false;
        }
        let Some(link) = self.link.as_mut() else {
            return false;
        };

        match link.port.write_all_bytes(data) {
            Ok(()) => {
                trace!("Sent {} byte(s) to {}", data.len(), link.port.name());
                true
            },
            Err(e) => {
                let err = Error::Transport(format!("write to {} failed: {e}", link.port.name()));
                warn!("{err}");
                self.shared
                    .emit_error(&err);
                false
            },
        }
    }

    fn establish(&mut self, config: &SerialConfig) -> Result<()> {
        let framer = self
            .options
            .framer()?;
        let mut port = self
            .opener
            .open(config)?;
        let reader_port = match self.prepare(port.as_mut()) {
            Ok(reader_port) => reader_port,
            Err(e) => {
                let _ = port.close();
                return Err(e);
            },
        };

        let running = Arc::new(AtomicBool::new(true));
        self.shared
            .set_state(SessionState::Open);
        info!("Connected to {}", self.settings);
        self.shared
            .emit_connected();

        let reader = {
            let running = Arc::clone(&running);
            let shared = Arc::clone(&self.shared);
            thread::Builder::new()
                .name("serialterm-reader".into())
                .spawn(move || read_loop(reader_port, framer, &running, &shared))
        };

        let reader = match reader {
            Ok(reader) => reader,
            Err(e) => {
                // Connected already fired, so finish with a regular disconnect
                self.link = Some(Link {
                    port,
                    running,
                    reader: None,
                });
                let err = Error::Transport(format!("failed to start reader thread: {e}"));
                self.shared
                    .emit_error(&err);
                let _ = self.disconnect();
                return Ok(());
            },
        };

        self.link = Some(Link {
            port,
            running,
            reader: Some(reader),
        });
        Ok(())
    }

    /// Apply control lines, drop bytes queued before the link existed and
    /// clone the handle for the reader thread.
    fn prepare(&self, port: &mut dyn Port) -> Result<Box<dyn Port>> {
        if let Some(level) = self.options.dtr {
            port.set_dtr(level)?;
        }
        if let Some(level) = self.options.rts {
            port.set_rts(level)?;
        }
        port.clear_buffers()?;
        port.try_clone()
    }

    /// Join a link whose reader already gave up after losing the device.
    fn reap_lost_link(&mut self) {
        if self.is_open() {
            return;
        }
        if let Some(link) = self.link.take() {
            debug!("Releasing lost link to {}", link.port.name());
            let _ = link.shutdown();
        }
    }
}

impl Drop for SerialSession {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            self.clear_callbacks();
            if let Err(e) = link.shutdown() {
                debug!("Close on drop failed: {e}");
            }
        }
    }
}

impl fmt::Debug for SerialSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialSession")
            .field("state", &self.state())
            .field("settings", &self.settings)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn read_loop(mut port: Box<dyn Port>, mut framer: LineFramer, running: &AtomicBool, shared: &Shared) {
    let mut buf = [0u8; READ_BUFFER_SIZE];

    while running.load(Ordering::Acquire) {
        match port.read(&mut buf) {
            Ok(0) => {},
            Ok(n) => {
                trace!("Received {n} byte(s) from {}", port.name());
                for line in framer.feed(&buf[..n]) {
                    if !running.load(Ordering::Acquire) {
                        break;
                    }
                    shared.emit_data(&strip_ansi(&String::from_utf8_lossy(&line)));
                }
            },
            Err(ref e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) => {},
            Err(e) => {
                // Only report if nobody asked us to stop
                if running.swap(false, Ordering::AcqRel)
                    && shared.transition(SessionState::Open, SessionState::Idle)
                {
                    warn!("{} closed unexpectedly: {e}", port.name());
                    shared.emit_error(&Error::TransportClosed(format!("{}: {e}", port.name())));
                    shared.emit_disconnected();
                }
                break;
            },
        }
    }

    let _ = port.close();
}
