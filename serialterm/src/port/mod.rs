//! Transport abstraction for serial communication.
//!
//! The session layer never talks to the OS directly. It goes through three
//! small traits:
//!
//! - [`Port`]: an open byte stream (read, write, close, clone for a reader)
//! - [`PortOpener`]: creates a [`Port`] from a [`SerialConfig`]
//! - [`PortEnumerator`]: lists the serial devices currently attached
//!
//! ```text
//! +------------------+        +------------------+
//! |  SerialSession   |        |   PortRegistry   |
//! +--------+---------+        +--------+---------+
//!          |                           |
//!          v                           v
//! +--------+---------+        +--------+---------+
//! | PortOpener/Port  |        |  PortEnumerator  |
//! +--------+---------+        +--------+---------+
//!          |                           |
//!          v                           v
//! +--------+---------------------------+---------+
//! |        native (serialport) / test doubles    |
//! +----------------------------------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use serialterm::port::{Port, PortOpener, SerialConfig};
//! use std::io::Read;
//!
//! fn example(opener: &dyn PortOpener) -> serialterm::Result<()> {
//!     let mut port = opener.open(&SerialConfig::new("/dev/ttyUSB0", 115200))?;
//!     port.write_all_bytes(b"AT\n\r")?;
//!
//!     let mut buf = [0u8; 32];
//!     let n = port.read(&mut buf)?;
//!     println!("Received: {:?}", &buf[..n]);
//!
//!     port.close()
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Serial port configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
    /// Data bits (typically 8).
    pub data_bits: DataBits,
    /// Parity (typically None).
    pub parity: Parity,
    /// Stop bits (typically One).
    pub stop_bits: StopBits,
    /// Flow control (typically None).
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 9600,
            timeout: Duration::from_millis(50),
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the character framing (data bits, parity, stop bits).
    #[must_use]
    pub fn with_framing(mut self, data_bits: DataBits, parity: Parity, stop_bits: StopBits) -> Self {
        self.data_bits = data_bits;
        self.parity = parity;
        self.stop_bits = stop_bits;
        self
    }

    /// Set the flow control mode.
    #[must_use]
    pub fn with_flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }
}

/// Number of data bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataBits {
    /// 5 data bits.
    Five,
    /// 6 data bits.
    Six,
    /// 7 data bits.
    Seven,
    /// 8 data bits.
    #[default]
    Eight,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    /// No parity.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    /// 1 stop bit.
    #[default]
    One,
    /// 2 stop bits.
    Two,
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    /// No flow control.
    #[default]
    None,
    /// Hardware flow control (RTS/CTS).
    Hardware,
    /// Software flow control (XON/XOFF).
    Software,
}

/// Raw serial port information as reported by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

/// An open serial byte stream.
///
/// Reads are expected to honour the configured timeout and fail with
/// [`std::io::ErrorKind::TimedOut`] when nothing arrived, so a reader loop
/// can poll a stop flag between reads.
pub trait Port: Read + Write + Send {
    /// Discard bytes queued in the driver's input and output buffers.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Set DTR (Data Terminal Ready) pin state.
    fn set_dtr(&mut self, level: bool) -> Result<()>;

    /// Set RTS (Request To Send) pin state.
    fn set_rts(&mut self, level: bool) -> Result<()>;

    /// Create a second handle on the same device, used by the reader thread.
    fn try_clone(&self) -> Result<Box<dyn Port>>;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

/// Factory for open ports.
///
/// The session owns one opener for its whole lifetime and asks it for a new
/// [`Port`] on every (re)connect.
pub trait PortOpener: Send + Sync {
    /// Open the device described by `config`.
    fn open(&self, config: &SerialConfig) -> Result<Box<dyn Port>>;
}

/// Trait for listing available serial ports.
///
/// This is separated from `Port` because it doesn't require an open port
/// instance.
pub trait PortEnumerator: Send + Sync {
    /// List all available serial ports, in host enumeration order.
    fn list_ports(&self) -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator, NativePortOpener};
