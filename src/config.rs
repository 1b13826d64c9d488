//! Device identities and persistent configuration
//!
//! Supports TOML serialization for persistent config storage. A missing
//! config file is not an error; defaults target the octokeyz.

use std::path::{Path, PathBuf};
use std::time::Duration;

use octokeyz_transport::DeviceFilter;
use serde::{Deserialize, Serialize};

/// USB identity of a keypad model, and the firmware interface it must speak
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub manufacturer: String,
    pub product: String,
    /// Supported major interface version (upper byte of bcdDevice)
    pub version_major: u8,
    /// Match the manufacturer/product strings too, for shared USB ids
    #[serde(default)]
    pub match_strings: bool,
    /// LED states are numbered from 0 regardless of firmware revision
    #[serde(default)]
    pub legacy_led: bool,
}

impl DeviceIdentity {
    /// octokeyz macropad (openmoko USB id)
    pub fn octokeyz() -> Self {
        Self {
            vendor_id: 0x1d50,
            product_id: 0x6184,
            manufacturer: "rgm.io".to_string(),
            product: "octokeyz".to_string(),
            version_major: 0x01,
            match_strings: false,
            legacy_led: false,
        }
    }

    /// b8 macropad
    ///
    /// Uses the shared V-USB vendor/product ids, so it is told apart from
    /// other V-USB devices by its strings. Its firmware always numbers LED
    /// states from 0.
    pub fn b8() -> Self {
        Self {
            vendor_id: 0x16c0,
            product_id: 0x05df,
            manufacturer: "rgm.io".to_string(),
            product: "b8".to_string(),
            version_major: 0x01,
            match_strings: true,
            legacy_led: true,
        }
    }

    /// Enumeration filters selecting this model
    pub fn filters(&self) -> Vec<DeviceFilter> {
        let filter = DeviceFilter::new(self.vendor_id, self.product_id);
        if self.match_strings {
            vec![filter.with_strings(&self.manufacturer, &self.product)]
        } else {
            vec![filter]
        }
    }
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self::octokeyz()
    }
}

/// Host-side configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeypadConfig {
    /// Device to use when several are connected
    pub serial_number: Option<String>,
    /// Read timeout of the listen loop, bounding stop latency
    pub poll_interval_ms: u64,
    /// Capacity of the handler error channel used by the CLI
    pub handler_error_capacity: usize,
    /// Keypad model to look for
    pub identity: DeviceIdentity,
}

impl Default for KeypadConfig {
    fn default() -> Self {
        Self {
            serial_number: None,
            poll_interval_ms: 100,
            handler_error_capacity: 16,
            identity: DeviceIdentity::default(),
        }
    }
}

impl KeypadConfig {
    /// Default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("octokeyz")
            .join("config.toml")
    }

    /// Load config from a file, or return default if not found
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: KeypadConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to a file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}
