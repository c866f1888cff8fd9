//! Interactive serial port selection.
//!
//! Resolution order:
//! - an explicit `--port` / `SERIALTERM_PORT`
//! - the port remembered in the configuration
//! - the only detected port
//! - an interactive prompt via dialoguer
//!
//! Non-interactive mode never prompts and treats zero or several candidates
//! as a usage error.

use {
    crate::{CliError, config::Config},
    anyhow::{Context, Result},
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, error, info},
    serialterm::{DeviceKind, PortDescriptor, PortRegistry, format_port_list},
    std::{cmp::Ordering, io::IsTerminal},
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// List all ports (including ports without a device identifier).
    pub list_all_ports: bool,
    /// Non-interactive mode (fail if zero or multiple ports).
    pub non_interactive: bool,
    /// Force confirmation even for a single recognized port.
    pub confirm_port: bool,
}

/// Where the selected port came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSource {
    /// `--port` or `SERIALTERM_PORT`.
    Explicit,
    /// The configuration file.
    Config,
    /// The only candidate, taken without asking.
    AutoDetected,
    /// Chosen or confirmed by the user.
    Prompted,
}

/// Result of port selection.
#[derive(Debug)]
pub struct SelectedPort {
    /// The selected port.
    pub port: PortDescriptor,
    /// How it was chosen.
    pub source: PortSource,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

fn select_non_interactive_port(mut candidates: Vec<PortDescriptor>) -> Result<SelectedPort> {
    match candidates
        .len()
        .cmp(&1)
    {
        Ordering::Equal => match candidates.pop() {
            Some(port) => Ok(SelectedPort {
                port,
                source: PortSource::AutoDetected,
            }),
            None => Err(usage_err("No serial ports available")),
        },
        Ordering::Greater => Err(usage_err(
            "Multiple serial ports found; pass --port to choose one",
        )),
        Ordering::Less => Err(usage_err("No serial ports available")),
    }
}

/// Select a serial port interactively or automatically.
pub fn select_serial_port(
    options: &SerialOptions,
    config: &Config,
    registry: &PortRegistry,
) -> Result<SelectedPort> {
    // If port explicitly specified, use it
    if let Some(port_name) = &options.port {
        return Ok(SelectedPort {
            port: find_port_by_name(registry, port_name),
            source: PortSource::Explicit,
        });
    }

    // If port in config, use it
    if let Some(port_name) = &config
        .connection
        .port
    {
        debug!("Using port from config: {port_name}");
        return Ok(SelectedPort {
            port: find_port_by_name(registry, port_name),
            source: PortSource::Config,
        });
    }

    let mut candidates = if options.list_all_ports {
        registry.list_all_ports()
    } else {
        registry.list_ports()
    }
    .context("Failed to enumerate serial ports")?;

    if candidates.is_empty() {
        return Err(usage_err("No serial ports found"));
    }

    sort_candidates(&mut candidates);

    // Non-interactive mode must never prompt
    if options.non_interactive {
        return select_non_interactive_port(candidates);
    }

    match candidates
        .len()
        .cmp(&1)
    {
        Ordering::Greater => {
            ensure_interactive_terminal()?;
            select_port_interactive(candidates)
        },
        Ordering::Equal => {
            let Some(port) = candidates.pop() else {
                return Err(usage_err("No serial ports available"));
            };

            if port.device.is_known() && !options.confirm_port {
                info!("Auto-selected port: {} [{}]", port.path, port.device.name());
                Ok(SelectedPort {
                    port,
                    source: PortSource::AutoDetected,
                })
            } else {
                ensure_interactive_terminal()?;
                confirm_single_port(port)
            }
        },
        Ordering::Less => Err(usage_err("No serial ports available")),
    }
}

/// Order candidates for display: USB bridges, then known boards, then the rest.
/// Host order is kept within each group.
fn sort_candidates(ports: &mut [PortDescriptor]) {
    ports.sort_by_key(|p| rank(p.device));
}

fn rank(device: DeviceKind) -> u8 {
    if device.is_high_priority() {
        0
    } else if device.is_known() {
        1
    } else {
        2
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Port selection needs an interactive terminal; pass --port instead",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Port selection cancelled".to_string()).into()
            } else {
                usage_err("Port selection prompt failed")
            }
        },
    }
}

/// Find a port by name, falling back to a bare descriptor for paths the host
/// does not list (e.g., pseudo terminals).
fn find_port_by_name(registry: &PortRegistry, name: &str) -> PortDescriptor {
    let ports = match registry.list_all_ports() {
        Ok(ports) => ports,
        Err(e) => {
            debug!("Port lookup failed, using {name} as given: {e}");
            Vec::new()
        },
    };

    ports
        .iter()
        .find(|p| p.path == name)
        .or_else(|| {
            ports
                .iter()
                .find(|p| p.path.eq_ignore_ascii_case(name))
        })
        .cloned()
        .unwrap_or_else(|| placeholder_port(name))
}

fn placeholder_port(name: &str) -> PortDescriptor {
    PortDescriptor {
        path: name.to_string(),
        has_device_identifier: false,
        vid: None,
        pid: None,
        manufacturer: None,
        product: None,
        serial_number: None,
        device: DeviceKind::Unknown,
    }
}

/// Interactive port selection.
fn select_port_interactive(ports: Vec<PortDescriptor>) -> Result<SelectedPort> {
    eprintln!(
        "{} Detected {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );

    // Truncate labels to fit terminal width to prevent wrapping
    let term_width = console::Term::stderr()
        .size()
        .1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = format_port_list(&ports)
        .iter()
        .map(|label| console::truncate_str(label, max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select a serial port")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => {
            let port = ports
                .into_iter()
                .nth(index)
                .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}"))?;
            Ok(SelectedPort {
                port,
                source: PortSource::Prompted,
            })
        },
        None => Err(CliError::Cancelled("Port selection cancelled".to_string()).into()),
    }
}

/// Confirm use of a single port.
fn confirm_single_port(port: PortDescriptor) -> Result<SelectedPort> {
    let product_info = port
        .product
        .as_ref()
        .map(|p| format!(" - {p}"))
        .unwrap_or_default();

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Use {}{product_info}?", port.path))
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(SelectedPort {
            port,
            source: PortSource::Prompted,
        })
    } else {
        Err(CliError::Cancelled("Port selection cancelled".to_string()).into())
    }
}

/// Ask the user whether to remember a prompted port as the default.
pub fn ask_remember_port(port: &PortDescriptor, config: &mut Config) -> Result<()> {
    if config
        .connection
        .port
        .as_deref()
        == Some(port.path.as_str())
    {
        return Ok(());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Remember {} as the default port?", port.path))
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        if let Err(e) = config.remember_port(&port.path) {
            error!("Failed to save port configuration: {e}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        serialterm::{PortEnumerator, PortInfo},
    };

    struct StaticPorts(Vec<PortInfo>);

    impl PortEnumerator for StaticPorts {
        fn list_ports(&self) -> serialterm::Result<Vec<PortInfo>> {
            Ok(self.0.clone())
        }
    }

    struct BrokenPorts;

    impl PortEnumerator for BrokenPorts {
        fn list_ports(&self) -> serialterm::Result<Vec<PortInfo>> {
            Err(serialterm::Error::Discovery("udev unavailable".to_string()))
        }
    }

    fn usb(name: &str, vid: u16, pid: u16) -> PortInfo {
        PortInfo {
            name: name.to_string(),
            vid: Some(vid),
            pid: Some(pid),
            ..Default::default()
        }
    }

    fn registry(ports: Vec<PortInfo>) -> PortRegistry {
        PortRegistry::new(StaticPorts(ports))
    }

    fn non_interactive() -> SerialOptions {
        SerialOptions {
            non_interactive: true,
            ..Default::default()
        }
    }

    fn assert_usage_error(err: &anyhow::Error) {
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }

    #[test]
    fn test_serial_options_default() {
        let options = SerialOptions::default();
        assert!(options.port.is_none());
        assert!(!options.list_all_ports);
        assert!(!options.non_interactive);
        assert!(!options.confirm_port);
    }

    #[test]
    fn test_explicit_port_wins() {
        let options = SerialOptions {
            port: Some("/dev/ttyUSB0".to_string()),
            ..non_interactive()
        };
        let mut config = Config::default();
        config.connection.port = Some("/dev/ttyACM0".to_string());

        let reg = registry(vec![usb("/dev/ttyUSB0", 0x1A86, 0x7523)]);
        let selected = select_serial_port(&options, &config, &reg).unwrap();
        assert_eq!(selected.port.path, "/dev/ttyUSB0");
        assert_eq!(selected.port.device, DeviceKind::Ch340);
        assert_eq!(selected.source, PortSource::Explicit);
    }

    #[test]
    fn test_config_port_used_when_not_explicit() {
        let mut config = Config::default();
        config.connection.port = Some("/dev/pts/7".to_string());

        let selected = select_serial_port(&non_interactive(), &config, &registry(vec![])).unwrap();
        assert_eq!(selected.port.path, "/dev/pts/7");
        assert!(!selected.port.has_device_identifier);
        assert_eq!(selected.source, PortSource::Config);
    }

    #[test]
    fn test_explicit_port_case_insensitive_match() {
        let reg = registry(vec![usb("COM3", 0x10C4, 0xEA60)]);
        let port = find_port_by_name(&reg, "com3");
        assert_eq!(port.path, "COM3");
        assert_eq!(port.device, DeviceKind::Cp210x);
    }

    #[test]
    fn test_non_interactive_single_port_is_selected() {
        let reg = registry(vec![
            usb("/dev/ttyUSB0", 0x9999, 0x0001),
            PortInfo {
                name: "/dev/ttyS0".to_string(),
                ..Default::default()
            },
        ]);
        let selected = select_serial_port(&non_interactive(), &Config::default(), &reg).unwrap();
        assert_eq!(selected.port.path, "/dev/ttyUSB0");
        assert_eq!(selected.source, PortSource::AutoDetected);
    }

    #[test]
    fn test_non_interactive_multiple_ports_returns_usage_error() {
        let reg = registry(vec![
            usb("/dev/ttyUSB0", 0x1A86, 0x7523),
            usb("/dev/ttyUSB1", 0x0403, 0x6001),
        ]);
        let err = select_serial_port(&non_interactive(), &Config::default(), &reg).unwrap_err();
        assert_usage_error(&err);
    }

    #[test]
    fn test_no_ports_returns_usage_error() {
        let err = select_serial_port(&non_interactive(), &Config::default(), &registry(vec![]))
            .unwrap_err();
        assert_usage_error(&err);

        let err = select_non_interactive_port(Vec::new()).unwrap_err();
        assert_usage_error(&err);
    }

    #[test]
    fn test_list_all_ports_includes_unidentified() {
        let reg = registry(vec![PortInfo {
            name: "/dev/ttyS0".to_string(),
            ..Default::default()
        }]);
        let options = SerialOptions {
            list_all_ports: true,
            ..non_interactive()
        };
        let selected = select_serial_port(&options, &Config::default(), &reg).unwrap();
        assert_eq!(selected.port.path, "/dev/ttyS0");
    }

    #[test]
    fn test_sort_candidates_puts_bridges_first() {
        let mut ports: Vec<PortDescriptor> = [
            usb("/dev/ttyUSB9", 0x9999, 0x0001),
            usb("/dev/ttyACM0", 0x2341, 0x0043),
            usb("/dev/ttyUSB0", 0x0403, 0x6001),
        ]
        .into_iter()
        .map(PortDescriptor::from)
        .collect();

        sort_candidates(&mut ports);
        let paths: Vec<&str> = ports.iter().map(|p| p.path.as_str()).collect();
        assert_eq!(paths, vec!["/dev/ttyUSB0", "/dev/ttyACM0", "/dev/ttyUSB9"]);
    }

    #[test]
    fn test_explicit_port_survives_discovery_failure() {
        let reg = PortRegistry::new(BrokenPorts);
        let port = find_port_by_name(&reg, "/dev/pts/3");
        assert_eq!(port.path, "/dev/pts/3");
        assert!(!port.has_device_identifier);
        assert_eq!(port.device, DeviceKind::Unknown);
    }
}
