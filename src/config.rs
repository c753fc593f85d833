//! Configuration management
//!
//! The monitor reads a TOML file (default `cec.toml` in the working
//! directory). Every section and field is optional.
//!
//! ```toml
//! [adapter]
//! kind = "serial"
//! serial_port = ""          # empty = auto-detect by vid/pid_list
//! baud_rate = 115200
//! reply_timeout_ms = 2000
//! vid = 0x16C0
//! pid_list = [0x0483]
//!
//! [session]
//! role = "sink"
//! promiscuous = false
//!
//! [logging]
//! verbose = false
//! ```

use crate::adapter::SerialAdapter;
use crate::constants::{DEFAULT_BAUD_RATE, DEFAULT_REPLY_TIMEOUT_MS};
use crate::error::{CecError, Result};
use crate::session::SessionConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Default config file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "cec.toml";

/// Full monitor configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub adapter: AdapterConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

/// Which transceiver backs the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    /// USB serial transceiver, COBS framed
    #[default]
    Serial,
    /// In-process simulated bus
    Virtual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub kind: AdapterKind,
    /// Serial port name (empty = auto-detect using `vid` and `pid_list`)
    pub serial_port: String,
    /// Ignored by USB CDC transceivers
    pub baud_rate: u32,
    /// How long to wait for a transceiver reply
    pub reply_timeout_ms: u64,
    /// USB vendor ID for auto-detection
    pub vid: Option<u16>,
    /// Accepted USB product IDs (empty = any product of `vid`)
    pub pid_list: Vec<u16>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            kind: AdapterKind::Serial,
            serial_port: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            reply_timeout_ms: DEFAULT_REPLY_TIMEOUT_MS,
            vid: None,
            pid_list: Vec::new(),
        }
    }
}

impl AdapterConfig {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    /// Explicit port, or the single transceiver matching `vid`/`pid_list`
    pub fn resolve_serial_port(&self) -> Result<String> {
        if !self.serial_port.is_empty() {
            return Ok(self.serial_port.clone());
        }
        match self.vid {
            Some(vid) => SerialAdapter::detect(vid, &self.pid_list),
            None => Err(CecError::ConfigValidation {
                field: "adapter.serial_port",
                reason: "no port given and no vid to detect one".into(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Debug-level driver logs
    pub verbose: bool,
}

impl Config {
    /// Check values serde cannot reject on its own
    pub fn validate(&self) -> Result<()> {
        if self.adapter.baud_rate == 0 {
            return Err(CecError::ConfigValidation {
                field: "adapter.baud_rate",
                reason: "must be positive".into(),
            });
        }
        if self.adapter.reply_timeout_ms == 0 {
            return Err(CecError::ConfigValidation {
                field: "adapter.reply_timeout_ms",
                reason: "must be positive".into(),
            });
        }
        if self.adapter.vid.is_none() && !self.adapter.pid_list.is_empty() {
            return Err(CecError::ConfigValidation {
                field: "adapter.pid_list",
                reason: "needs adapter.vid".into(),
            });
        }
        Ok(())
    }

    /// Parse and validate TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| CecError::ConfigValidation {
            field: "config",
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }
}

/// Path used when none is given on the command line
pub fn default_path() -> PathBuf {
    PathBuf::from(DEFAULT_CONFIG_FILE)
}

/// Load config from `path`; a missing file yields defaults
///
/// # Errors
///
/// - `Io` if the file exists but cannot be read
/// - `ConfigValidation` if it is not valid TOML or holds invalid values
pub fn load(path: &Path) -> Result<Config> {
    match read(path)? {
        Some(config) => Ok(config),
        None => {
            warn!("Config {:?} not found, using defaults", path);
            Ok(Config::default())
        }
    }
}

/// Like [`load`], but reports a missing file as `None` and logs nothing
///
/// For callers that install logging from the config they read.
pub fn read(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path).map_err(|e| CecError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Config::from_toml(&content).map(Some)
}

/// Save config to `path`
pub fn save(config: &Config, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config).map_err(|e| CecError::ConfigValidation {
        field: "config",
        reason: e.to_string(),
    })?;
    fs::write(path, content).map_err(|e| CecError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::DeviceRole;

    #[test]
    fn test_default_adapter_config_values() {
        let config = AdapterConfig::default();

        assert_eq!(config.kind, AdapterKind::Serial);
        assert_eq!(config.serial_port, "");
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.reply_timeout(), Duration::from_millis(2000));
        assert_eq!(config.vid, None);
    }

    #[test]
    fn test_config_empty_file() {
        let config = Config::from_toml("").unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.session.role, DeviceRole::Sink);
        assert!(!config.session.promiscuous);
        assert!(!config.logging.verbose);
    }

    #[test]
    fn test_config_partial_sections() {
        let config = Config::from_toml(
            r#"
[adapter]
kind = "virtual"

[session]
role = "source"
promiscuous = true
"#,
        )
        .unwrap();

        assert_eq!(config.adapter.kind, AdapterKind::Virtual);
        assert_eq!(config.adapter.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.session.role, DeviceRole::Source);
        assert!(config.session.promiscuous);
    }

    #[test]
    fn test_config_rejects_bad_values() {
        let err = Config::from_toml("[adapter]\nreply_timeout_ms = 0\n").unwrap_err();
        assert!(matches!(
            err,
            CecError::ConfigValidation {
                field: "adapter.reply_timeout_ms",
                ..
            }
        ));

        let err = Config::from_toml("[adapter]\nkind = \"usb\"\n").unwrap_err();
        assert!(matches!(err, CecError::ConfigValidation { field: "config", .. }));

        let err = Config::from_toml("[adapter]\npid_list = [1]\n").unwrap_err();
        assert!(matches!(
            err,
            CecError::ConfigValidation {
                field: "adapter.pid_list",
                ..
            }
        ));
    }

    #[test]
    fn test_config_serialize_deserialize_roundtrip() {
        let config = Config {
            adapter: AdapterConfig {
                kind: AdapterKind::Serial,
                serial_port: "/dev/ttyACM0".to_string(),
                baud_rate: 38_400,
                reply_timeout_ms: 500,
                vid: Some(0x16C0),
                pid_list: vec![0x0483, 0x0489],
            },
            session: SessionConfig {
                role: DeviceRole::Source,
                promiscuous: true,
            },
            logging: LoggingConfig { verbose: true },
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let restored = Config::from_toml(&toml_str).unwrap();

        assert_eq!(restored, config);
    }

    #[test]
    fn test_explicit_port_wins_over_detection() {
        let config = AdapterConfig {
            serial_port: "COM3".to_string(),
            vid: Some(0x16C0),
            ..AdapterConfig::default()
        };
        assert_eq!(config.resolve_serial_port().unwrap(), "COM3");
    }

    #[test]
    fn test_no_port_and_no_vid_is_invalid() {
        let err = AdapterConfig::default().resolve_serial_port().unwrap_err();
        assert!(matches!(err, CecError::ConfigValidation { .. }));
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let config = load(Path::new("/nonexistent/cec-monitor/cec.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_read_missing_file_is_none() {
        assert!(read(Path::new("/nonexistent/cec-monitor/cec.toml"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_save_then_load() {
        let path = std::env::temp_dir().join(format!("cec-config-{}.toml", std::process::id()));
        let mut config = Config::default();
        config.adapter.kind = AdapterKind::Virtual;
        config.logging.verbose = true;

        save(&config, &path).unwrap();
        let loaded = load(&path).unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(loaded, config);
    }
}
