//! Port discovery.
//!
//! The registry asks a [`PortEnumerator`] for the devices currently attached
//! and keeps only those the host reports a USB vendor/product identifier for.
//! Ports without one are typically built-in UARTs, virtual consoles or
//! loopback devices and are dropped without a message.
//!
//! Descriptors are recomputed on every call and never cached; the order is
//! whatever the host enumerated, so callers that need a stable listing should
//! sort it themselves.
//!
//! ## Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "native")]
//! # fn main() -> serialterm::Result<()> {
//! use serialterm::PortRegistry;
//!
//! let registry = PortRegistry::native();
//! for port in registry.list_ports()? {
//!     println!("{} [{}]", port.path, port.device.name());
//! }
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "native"))]
//! # fn main() {}
//! ```

use std::sync::Arc;

use log::{debug, warn};

use crate::{
    device::DeviceKind,
    error::{Error, Result},
    port::{PortEnumerator, PortInfo},
};

/// A discovered serial port.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PortDescriptor {
    /// Device path (e.g., "/dev/ttyUSB0" or "COM3").
    pub path: String,
    /// Whether the host reported a vendor/product identifier.
    pub has_device_identifier: bool,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
    /// Classified device kind.
    pub device: DeviceKind,
}

impl PortDescriptor {
    /// Human-readable one-line description: `path [Device] - product`.
    /// Unclassified ports show their raw vendor/product IDs instead.
    pub fn label(&self) -> String {
        let device_info = if self.device.is_known() {
            format!(" [{}]", self.device.name())
        } else if let (Some(vid), Some(pid)) = (self.vid, self.pid) {
            format!(" [VID:{vid:04X} PID:{pid:04X}]")
        } else {
            String::new()
        };

        let product_info = self
            .product
            .as_ref()
            .map(|p| format!(" - {p}"))
            .unwrap_or_default();

        format!("{}{device_info}{product_info}", self.path)
    }
}

impl From<PortInfo> for PortDescriptor {
    fn from(info: PortInfo) -> Self {
        let device = match (info.vid, info.pid) {
            (Some(vid), Some(pid)) => DeviceKind::from_vid_pid(vid, pid),
            _ => DeviceKind::Unknown,
        };

        Self {
            has_device_identifier: info.vid.is_some() || info.pid.is_some(),
            path: info.name,
            vid: info.vid,
            pid: info.pid,
            manufacturer: info.manufacturer,
            product: info.product,
            serial_number: info.serial_number,
            device,
        }
    }
}

/// Convert raw port information into descriptors, keeping only ports with a
/// device identifier. Order is preserved.
pub fn filter_ports(ports: Vec<PortInfo>) -> Vec<PortDescriptor> {
    ports
        .into_iter()
        .map(PortDescriptor::from)
        .filter(|p| p.has_device_identifier)
        .collect()
}

/// Pick the best auto-selection candidate: bridges first, then any known
/// board, then whatever came first.
pub fn best_candidate(ports: &[PortDescriptor]) -> Option<&PortDescriptor> {
    ports
        .iter()
        .find(|p| p.device.is_high_priority())
        .or_else(|| ports.iter().find(|p| p.device.is_known()))
        .or_else(|| ports.first())
}

/// Format a list of descriptors for display, one [`PortDescriptor::label`]
/// per port.
pub fn format_port_list(ports: &[PortDescriptor]) -> Vec<String> {
    ports
        .iter()
        .map(PortDescriptor::label)
        .collect()
}

/// Queries the host for attached serial devices.
#[derive(Clone)]
pub struct PortRegistry {
    enumerator: Arc<dyn PortEnumerator>,
}

impl PortRegistry {
    /// Create a registry backed by the given enumerator.
    pub fn new(enumerator: impl PortEnumerator + 'static) -> Self {
        Self {
            enumerator: Arc::new(enumerator),
        }
    }

    /// Create a registry backed by the host serial driver.
    #[cfg(feature = "native")]
    pub fn native() -> Self {
        Self::new(crate::port::NativePortEnumerator)
    }

    /// List ports that carry a device identifier.
    pub fn list_ports(&self) -> Result<Vec<PortDescriptor>> {
        let ports = self.enumerate()?;
        let total = ports.len();
        let filtered = filter_ports(ports);
        debug!(
            "Discovered {} port(s), {} with a device identifier",
            total,
            filtered.len()
        );
        Ok(filtered)
    }

    /// List every port the host reports, identifier or not.
    pub fn list_all_ports(&self) -> Result<Vec<PortDescriptor>> {
        Ok(self
            .enumerate()?
            .into_iter()
            .map(PortDescriptor::from)
            .collect())
    }

    fn enumerate(&self) -> Result<Vec<PortInfo>> {
        self.enumerator
            .list_ports()
            .map_err(|e| {
                warn!("Failed to enumerate serial ports: {e}");
                match e {
                    Error::Discovery(_) => e,
                    other => Error::Discovery(other.to_string()),
                }
            })
    }
}

impl std::fmt::Debug for PortRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortRegistry")
            .finish_non_exhaustive()
    }
}
