//! Error types for serialterm.

use std::io;
use thiserror::Error;

/// Result type for serialterm operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for serialterm operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on an open port.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error reported by the native backend.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Port enumeration failed. Recoverable, retry on the next poll.
    #[error("Port discovery failed: {0}")]
    Discovery(String),

    /// Malformed connection settings. Rejected before any state change.
    #[error("Invalid settings: {0}")]
    Validation(String),

    /// The session is already open with identical settings.
    #[error("Already connected to {path} at {baud} baud")]
    AlreadyConnected {
        /// Device path of the live connection.
        path: String,
        /// Baud rate of the live connection.
        baud: u32,
    },

    /// Open, close or write failed at the transport boundary.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The device went away while the session was open.
    #[error("Transport closed unexpectedly: {0}")]
    TransportClosed(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
