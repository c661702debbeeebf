//! Simulation parameters for one card.
//!
//! Everything here is a knob of the emulator, not a property of real
//! hardware: quotas and buffer sizes can be shrunk to provoke the failure
//! paths applets need to handle.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aid::Aid;
use crate::apdu::{DEFAULT_BUFFER_SIZE, MIN_BUFFER_SIZE};
use crate::memory::Quotas;

/// Answer-To-Reset sent after every reset unless configured otherwise.
pub const DEFAULT_ATR: &str = "3BFA1800008131FE454A434F5033315632333298";

/// Most supplementary channels plus the basic channel.
pub const MAX_LOGICAL_CHANNELS: u8 = 20;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One applet to install when the card is built from configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppletConfig {
    /// Catalog name of the applet class.
    pub class: String,
    /// Instance AID, hex.
    pub aid: String,
    /// Applet-specific install data, hex.
    #[serde(default)]
    pub params: String,
}

impl AppletConfig {
    pub fn aid(&self) -> Result<Aid, ConfigError> {
        self.aid
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("applet {}: {}", self.class, e)))
    }

    pub fn params(&self) -> Result<Vec<u8>, ConfigError> {
        hex::decode(&self.params)
            .map_err(|e| ConfigError::Invalid(format!("applet {} params: {}", self.class, e)))
    }
}

/// Card configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardConfig {
    /// Persistent memory quota in bytes.
    pub persistent_quota: usize,
    /// Clear-on-reset transient quota in bytes.
    pub clear_on_reset_quota: usize,
    /// Clear-on-deselect transient quota in bytes.
    pub clear_on_deselect_quota: usize,
    /// Transaction journal capacity in bytes.
    pub commit_capacity: usize,
    /// APDU buffer size.
    pub apdu_buffer_size: usize,
    /// Accept extended Lc/Le encodings.
    pub extended_length: bool,
    /// Number of logical channels, basic channel included.
    pub logical_channels: u8,
    /// Capacity of the applet registry.
    pub max_applets: usize,
    /// Answer-To-Reset, hex.
    pub atr: String,
    /// Applets to install at startup.
    pub applets: Vec<AppletConfig>,
}

impl Default for CardConfig {
    fn default() -> Self {
        CardConfig {
            persistent_quota: 65_536,
            clear_on_reset_quota: 4_096,
            clear_on_deselect_quota: 4_096,
            commit_capacity: 1_024,
            apdu_buffer_size: DEFAULT_BUFFER_SIZE,
            extended_length: false,
            logical_channels: 4,
            max_applets: 16,
            atr: DEFAULT_ATR.to_string(),
            applets: Vec::new(),
        }
    }
}

impl CardConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: CardConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.apdu_buffer_size < MIN_BUFFER_SIZE {
            return Err(ConfigError::Invalid(format!(
                "apdu_buffer_size {} below minimum {}",
                self.apdu_buffer_size, MIN_BUFFER_SIZE
            )));
        }
        if !(1..=MAX_LOGICAL_CHANNELS).contains(&self.logical_channels) {
            return Err(ConfigError::Invalid(format!(
                "logical_channels {} outside 1..={}",
                self.logical_channels, MAX_LOGICAL_CHANNELS
            )));
        }
        if self.max_applets == 0 {
            return Err(ConfigError::Invalid("max_applets must be at least 1".into()));
        }
        self.atr_bytes()?;
        for applet in &self.applets {
            applet.aid()?;
            applet.params()?;
        }
        Ok(())
    }

    pub fn quotas(&self) -> Quotas {
        Quotas {
            persistent: self.persistent_quota,
            clear_on_reset: self.clear_on_reset_quota,
            clear_on_deselect: self.clear_on_deselect_quota,
        }
    }

    pub fn atr_bytes(&self) -> Result<Vec<u8>, ConfigError> {
        let atr = hex::decode(&self.atr)
            .map_err(|e| ConfigError::Invalid(format!("atr: {}", e)))?;
        if atr.is_empty() || atr.len() > 33 {
            return Err(ConfigError::Invalid(format!("atr length {} outside 1..=33", atr.len())));
        }
        Ok(atr)
    }
}
