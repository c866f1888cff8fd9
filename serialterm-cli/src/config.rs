//! Configuration file support for serialterm.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (SERIALTERM_*)
//! 3. Local config file (./serialterm.toml)
//! 4. Global config file (~/.config/serialterm/config.toml)

use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Local configuration file name.
pub const LOCAL_CONFIG_FILE: &str = "serialterm.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Monitor configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Inbound line delimiter (TOML escapes such as "\r\n" apply).
    pub delimiter: Option<String>,
    /// Force-flush cap for a line without delimiter. 0 disables the cap.
    pub max_line_length: Option<usize>,
    /// Show timestamps by default.
    pub timestamp: Option<bool>,
    /// Append received lines to this file.
    pub log_file: Option<PathBuf>,
    /// DTR level to set after opening the port.
    pub dtr: Option<bool>,
    /// RTS level to set after opening the port.
    pub rts: Option<bool>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Connection configuration.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Monitor configuration.
    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "serialterm").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one. Values present in `other` win.
    fn merge(&mut self, other: Self) {
        if other.connection.port.is_some() {
            self.connection.port = other.connection.port;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }

        if other.monitor.delimiter.is_some() {
            self.monitor.delimiter = other.monitor.delimiter;
        }
        if other.monitor.max_line_length.is_some() {
            self.monitor.max_line_length = other.monitor.max_line_length;
        }
        if other.monitor.timestamp.is_some() {
            self.monitor.timestamp = other.monitor.timestamp;
        }
        if other.monitor.log_file.is_some() {
            self.monitor.log_file = other.monitor.log_file;
        }
        if other.monitor.dtr.is_some() {
            self.monitor.dtr = other.monitor.dtr;
        }
        if other.monitor.rts.is_some() {
            self.monitor.rts = other.monitor.rts;
        }
    }

    /// Where a remembered port is written: the local file if one exists,
    /// otherwise the global one.
    fn remember_target() -> anyhow::Result<PathBuf> {
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            return Ok(local);
        }
        match Self::global_config_dir() {
            Some(global_dir) => {
                fs::create_dir_all(&global_dir)?;
                Ok(global_dir.join("config.toml"))
            },
            None => Ok(local),
        }
    }

    /// Save `port` as the default port.
    pub fn remember_port(&mut self, port: &str) -> anyhow::Result<()> {
        let path = Self::remember_target()?;
        self.remember_port_in(port, &path)
    }

    /// Save `port` as the default port in the config file at `path`, keeping
    /// everything else that file contains.
    pub fn remember_port_in(&mut self, port: &str, path: &Path) -> anyhow::Result<()> {
        let mut on_disk = Self::load_from_file(path).unwrap_or_default();
        on_disk.connection.port = Some(port.to_string());

        let content = toml::to_string_pretty(&on_disk)?;
        fs::write(path, content)?;
        info!("Saved port {port} to {}", path.display());

        self.connection.port = Some(port.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---- Default values ----

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.connection.port.is_none());
        assert!(config.connection.baud.is_none());
        assert!(config.monitor.delimiter.is_none());
        assert!(config.monitor.max_line_length.is_none());
        assert!(config.monitor.timestamp.is_none());
        assert!(config.monitor.log_file.is_none());
        assert!(config.monitor.dtr.is_none());
        assert!(config.monitor.rts.is_none());
    }

    // ---- Config merge ----

    #[test]
    fn test_config_merge_connection() {
        let mut base = Config::default();
        base.connection.baud = Some(9600);

        let mut other = Config::default();
        other.connection.port = Some("/dev/ttyUSB0".to_string());
        other.connection.baud = Some(115200);

        base.merge(other);
        assert_eq!(base.connection.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(base.connection.baud, Some(115200));
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.connection.port = Some("/dev/ttyUSB0".to_string());
        base.monitor.delimiter = Some("\r\n".to_string());
        base.monitor.timestamp = Some(true);

        base.merge(Config::default());

        assert_eq!(base.connection.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(base.monitor.delimiter.as_deref(), Some("\r\n"));
        assert_eq!(base.monitor.timestamp, Some(true));
    }

    #[test]
    fn test_local_config_can_turn_settings_off() {
        let mut global: Config = toml::from_str("[monitor]\ntimestamp = true\ndtr = true\n").unwrap();
        let local: Config = toml::from_str("[monitor]\ntimestamp = false\ndtr = false\n").unwrap();

        global.merge(local);
        assert_eq!(global.monitor.timestamp, Some(false));
        assert_eq!(global.monitor.dtr, Some(false));
    }

    #[test]
    fn test_config_merge_monitor() {
        let mut base = Config::default();
        let mut other = Config::default();
        other.monitor.max_line_length = Some(256);
        other.monitor.log_file = Some(PathBuf::from("serial.log"));

        base.merge(other);
        assert_eq!(base.monitor.max_line_length, Some(256));
        assert_eq!(base.monitor.log_file, Some(PathBuf::from("serial.log")));
    }

    // ---- TOML ----

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[connection]
port = "/dev/ttyACM0"
baud = 115200

[monitor]
delimiter = "\r\n"
max_line_length = 4096
timestamp = true
log_file = "capture.log"
dtr = false
rts = true
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.connection.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.connection.baud, Some(115200));
        assert_eq!(config.monitor.delimiter.as_deref(), Some("\r\n"));
        assert_eq!(config.monitor.max_line_length, Some(4096));
        assert_eq!(config.monitor.timestamp, Some(true));
        assert_eq!(config.monitor.log_file, Some(PathBuf::from("capture.log")));
        assert_eq!(config.monitor.dtr, Some(false));
        assert_eq!(config.monitor.rts, Some(true));
    }

    #[test]
    fn test_config_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_config_from_partial_toml() {
        let config: Config = toml::from_str("[connection]\nbaud = 57600\n").unwrap();
        assert!(config.connection.port.is_none());
        assert_eq!(config.connection.baud, Some(57600));
    }

    // ---- Files ----

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("serialterm.toml");
        fs::write(&path, "[connection]\nport = \"COM3\"\n").unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.connection.port.as_deref(), Some("COM3"));
    }

    #[test]
    fn test_load_from_path_invalid_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[connection\nport = ").unwrap();

        assert_eq!(Config::load_from_path(&path), Config::default());
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        assert!(config.connection.port.is_none());
    }

    #[test]
    fn test_remember_port_keeps_other_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("serialterm.toml");
        fs::write(&path, "[monitor]\ntimestamp = true\n").unwrap();

        let mut config = Config::default();
        config.remember_port_in("/dev/ttyUSB1", &path).unwrap();
        assert_eq!(config.connection.port.as_deref(), Some("/dev/ttyUSB1"));

        let saved = Config::load_from_path(&path);
        assert_eq!(saved.connection.port.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(saved.monitor.timestamp, Some(true));
    }

    #[test]
    fn test_global_config_path_shape() {
        if let Some(p) = Config::global_config_path() {
            let p = p.to_string_lossy();
            assert!(p.contains("serialterm"));
            assert!(p.ends_with("config.toml"));
        }
    }
}
