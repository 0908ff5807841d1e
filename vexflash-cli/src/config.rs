//! Configuration file support for vexflash.
//!
//! Sources, highest priority first:
//! 1. Command-line arguments
//! 2. Environment variables (VEXFLASH_*)
//! 3. Local config file (./vexflash.toml)
//! 4. Global config file (~/.config/vexflash/config.toml)
//!
//! Cables the user chose to remember are kept apart in `ports.toml` next to
//! the global config so saving one never rewrites a hand-edited file.

use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Local configuration file name.
pub const LOCAL_CONFIG_FILE: &str = "vexflash.toml";

/// USB identity of a serial adapter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbDevice {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

impl UsbDevice {
    /// Whether this entry names `vid`/`pid`.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

/// `[port]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Per-read timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Extra adapters to treat as programming cables.
    #[serde(default)]
    pub usb_device: Vec<UsbDevice>,
}

/// `[upload]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Skip the program-mode confirmation.
    #[serde(default)]
    pub skip_prompt: bool,
}

/// Remembered cables (`ports.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RememberedPorts {
    #[serde(default)]
    usb_device: Vec<UsbDevice>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Upload configuration.
    #[serde(default)]
    pub upload: UploadConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path()
            && let Some(global_config) = Self::load_from_file(&global_path)
        {
            debug!("Loaded global config from {}", global_path.display());
            config.merge(global_config);
        }

        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        if let Some(path) = Self::remembered_ports_path() {
            config
                .port
                .usb_device
                .extend(Self::load_remembered(&path));
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

    fn load_remembered(path: &Path) -> Vec<UsbDevice> {
        fs::read_to_string(path)
            .ok()
            .and_then(|content| toml::from_str::<RememberedPorts>(&content).ok())
            .map(|remembered| remembered.usb_device)
            .unwrap_or_default()
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "vexflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    fn remembered_ports_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("ports.toml"))
    }

    /// Merge another config into this one; `other` wins where it is set.
    fn merge(&mut self, other: Self) {
        if other.port.serial.is_some() {
            self.port.serial = other.port.serial;
        }
        if other.port.timeout_secs.is_some() {
            self.port.timeout_secs = other.port.timeout_secs;
        }
        self.port.usb_device.extend(other.port.usb_device);

        if other.upload.skip_prompt {
            self.upload.skip_prompt = true;
        }
    }

    /// Configured read timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.port.timeout_secs.map(Duration::from_secs)
    }

    /// Configured cables as `(vid, pid)` pairs.
    pub fn cable_ids(&self) -> Vec<(u16, u16)> {
        self.port
            .usb_device
            .iter()
            .map(|d| (d.vid, d.pid))
            .collect()
    }

    /// Remember `vid`/`pid` as a programming cable.
    pub fn remember_usb_device(&mut self, vid: u16, pid: u16) -> anyhow::Result<()> {
        let device = UsbDevice { vid, pid };
        if self.port.usb_device.contains(&device) {
            return Ok(());
        }

        let Some(path) = Self::remembered_ports_path() else {
            anyhow::bail!("no configuration directory available");
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let mut remembered = RememberedPorts {
            usb_device: Self::load_remembered(&path),
        };
        if !remembered.usb_device.contains(&device) {
            remembered.usb_device.push(device);
        }
        fs::write(&path, toml::to_string_pretty(&remembered)?)?;
        info!("Saved USB device to {}", path.display());

        self.port.usb_device.push(device);
        Ok(())
    }
}
