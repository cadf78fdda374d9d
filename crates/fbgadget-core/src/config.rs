//! Engine configuration.

use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

use crate::protocol::constants::{DEFAULT_STAGING_CAPACITY, EP_BUFFER_SIZE, RX_MAX_PACKET_SIZE_HS};

/// Static board facts reported through `getvar`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardInfo {
    pub product: String,
    pub variant: String,
    pub bootloader_version: String,
    pub secure: String,
    /// Reported when no lock collaborator is configured.
    pub unlocked: String,
    pub off_mode_charge: String,
    pub battery_voltage: String,
    pub battery_soc_ok: String,
}

impl Default for BoardInfo {
    fn default() -> Self {
        Self {
            product: "evb".to_string(),
            variant: "userdebug".to_string(),
            bootloader_version: concat!("fbgadget ", env!("CARGO_PKG_VERSION")).to_string(),
            secure: "no".to_string(),
            unlocked: "yes".to_string(),
            off_mode_charge: "0".to_string(),
            battery_voltage: "7.4".to_string(),
            battery_soc_ok: "yes".to_string(),
        }
    }
}

/// Configuration for a fastboot engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Size of the staging buffer in bytes.
    pub staging_capacity: usize,
    /// Size of the inbound/outbound request buffers.
    pub ep_buffer_size: usize,
    pub board: BoardInfo,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            staging_capacity: DEFAULT_STAGING_CAPACITY,
            ep_buffer_size: EP_BUFFER_SIZE,
            board: BoardInfo::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.ep_buffer_size > 0 && self.ep_buffer_size % RX_MAX_PACKET_SIZE_HS == 0,
            "ep_buffer_size {} must be a non-zero multiple of {}",
            self.ep_buffer_size,
            RX_MAX_PACKET_SIZE_HS
        );
        ensure!(self.staging_capacity > 0, "staging_capacity must be non-zero");
        ensure!(
            u32::try_from(self.staging_capacity).is_ok(),
            "staging_capacity {:#x} does not fit a DATA size",
            self.staging_capacity
        );
        Ok(())
    }
}
