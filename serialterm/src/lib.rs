//! # serialterm
//!
//! A library for talking to line-oriented serial devices.
//!
//! This crate provides the building blocks of a serial terminal:
//!
//! - Port discovery that keeps only USB-backed devices
//! - A connection session with explicit lifecycle states and event callbacks
//! - Delimiter-based line framing of the inbound byte stream
//! - Removal of ANSI/VT escape sequences from received text
//!
//! ## Supported Platforms
//!
//! - **Native** (default): Linux, macOS, Windows via the `serialport` crate
//!
//! ## Features
//!
//! - `native` (default): Native serial port support
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "native")]
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     use serialterm::{PortRegistry, SerialSession};
//!
//!     let ports = PortRegistry::native().list_ports()?;
//!     let Some(port) = ports.first() else {
//!         return Ok(());
//!     };
//!
//!     let mut session = SerialSession::native();
//!     session.on_data(|line| println!("{line}"));
//!     session.connect(&port.path, 115200)?;
//!
//!     session.send("version");
//!     std::thread::sleep(std::time::Duration::from_secs(1));
//!
//!     session.disconnect()?;
//!     Ok(())
//! }
//! # #[cfg(not(feature = "native"))]
//! # fn main() {}
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ansi;
pub mod device;
pub mod error;
pub mod framer;
pub mod port;
pub mod registry;
pub mod session;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator, NativePortOpener};
pub use {
    ansi::{contains_ansi, strip_ansi},
    device::DeviceKind,
    error::{Error, Result},
    framer::{DEFAULT_DELIMITER, DEFAULT_MAX_LINE_LENGTH, LineFramer},
    port::{Port, PortEnumerator, PortInfo, PortOpener, SerialConfig},
    registry::{PortDescriptor, PortRegistry, best_candidate, filter_ports, format_port_list},
    session::{
        ConnectionSettings, LINE_TERMINATOR, SerialSession, SessionCallbacks, SessionOptions,
        SessionState,
    },
};
