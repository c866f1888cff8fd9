//! USB device classification.
//!
//! Maps host-reported USB vendor/product IDs onto the USB-to-UART bridges
//! and development boards most often found behind a serial port. The
//! classification is only used for display and for ordering candidates; the
//! registry filter itself only cares whether an identifier exists at all.

/// Known USB bridge/board kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum DeviceKind {
    /// CH340/CH341 USB-to-Serial converter.
    Ch340,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// FTDI FT232/FT2232/FT4232 USB-to-Serial converter.
    Ftdi,
    /// Prolific PL2303 USB-to-Serial converter.
    Prolific,
    /// Arduino board with native USB.
    Arduino,
    /// Raspberry Pi RP2040/RP2350 board (CDC-ACM).
    RaspberryPi,
    /// Espressif chip with native USB-Serial/JTAG.
    Espressif,
    /// STMicroelectronics ST-LINK virtual COM port.
    StLink,
    /// Unknown device.
    Unknown,
}

/// Known USB VID/PID pairs. An empty PID list matches every product of the vendor.
const KNOWN_USB_DEVICES: &[(u16, &[u16], DeviceKind)] = &[
    (
        0x1A86,
        &[0x7523, 0x7522, 0x5523, 0x5512, 0x55D4],
        DeviceKind::Ch340,
    ),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71, 0xEA63], DeviceKind::Cp210x),
    (
        0x0403,
        &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015],
        DeviceKind::Ftdi,
    ),
    (0x067B, &[0x2303, 0x23A3, 0x23C3, 0x23D3], DeviceKind::Prolific),
    (0x2341, &[], DeviceKind::Arduino),
    (0x2E8A, &[], DeviceKind::RaspberryPi),
    (0x303A, &[], DeviceKind::Espressif),
    (0x0483, &[0x374B, 0x3752, 0x374E], DeviceKind::StLink),
];

impl DeviceKind {
    /// Classify a VID/PID combination.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        for (known_vid, pids, device) in KNOWN_USB_DEVICES {
            if vid == *known_vid && (pids.is_empty() || pids.contains(&pid)) {
                return *device;
            }
        }
        Self::Unknown
    }

    /// Get a human-readable name for the device kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ch340 => "CH340/CH341",
            Self::Cp210x => "CP210x",
            Self::Ftdi => "FTDI",
            Self::Prolific => "PL2303",
            Self::Arduino => "Arduino",
            Self::RaspberryPi => "Raspberry Pi",
            Self::Espressif => "Espressif",
            Self::StLink => "ST-LINK",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known/expected device kind.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Dedicated USB-UART bridges sort ahead of boards during auto-selection.
    pub fn is_high_priority(&self) -> bool {
        matches!(
            self,
            Self::Ch340 | Self::Cp210x | Self::Ftdi | Self::Prolific
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_kind_from_vid_pid() {
        assert_eq!(DeviceKind::from_vid_pid(0x1A86, 0x7523), DeviceKind::Ch340);
        assert_eq!(DeviceKind::from_vid_pid(0x10C4, 0xEA60), DeviceKind::Cp210x);
        assert_eq!(DeviceKind::from_vid_pid(0x0403, 0x6001), DeviceKind::Ftdi);
        assert_eq!(DeviceKind::from_vid_pid(0x067B, 0x2303), DeviceKind::Prolific);
        assert_eq!(DeviceKind::from_vid_pid(0x2341, 0x0043), DeviceKind::Arduino);
        assert_eq!(DeviceKind::from_vid_pid(0x2E8A, 0x000A), DeviceKind::RaspberryPi);
        assert_eq!(DeviceKind::from_vid_pid(0x0483, 0x374B), DeviceKind::StLink);
        assert_eq!(DeviceKind::from_vid_pid(0x1234, 0x5678), DeviceKind::Unknown);
    }

    #[test]
    fn test_known_vendor_with_unlisted_pid_is_unknown() {
        assert_eq!(DeviceKind::from_vid_pid(0x1A86, 0x0001), DeviceKind::Unknown);
        assert_eq!(DeviceKind::from_vid_pid(0x0483, 0xDF11), DeviceKind::Unknown);
    }

    #[test]
    fn test_device_kind_is_known() {
        assert!(DeviceKind::Ch340.is_known());
        assert!(DeviceKind::Espressif.is_known());
        assert!(!DeviceKind::Unknown.is_known());
    }

    #[test]
    fn test_device_kind_priority() {
        assert!(DeviceKind::Cp210x.is_high_priority());
        assert!(!DeviceKind::Arduino.is_high_priority());
        assert!(!DeviceKind::Unknown.is_high_priority());
    }
}
