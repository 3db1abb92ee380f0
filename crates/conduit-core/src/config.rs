//! Engine configuration, loadable from TOML, JSON or RON.
//!
//! Every field has a default, so a config file only needs the values it
//! changes.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ===========================================================================
// Errors
// ===========================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file has an extension we don't support.
    #[error("unsupported config format: {file}")]
    UnsupportedFormat { file: PathBuf },

    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Sections
// ===========================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyConfig {
    pub tick_delay: u64,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self { tick_delay: 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemConfig {
    pub tick_delay: u64,
    /// Items moved per channel each time the item algorithm runs.
    pub transfer_amount: u32,
}

impl Default for ItemConfig {
    fn default() -> Self {
        Self {
            tick_delay: 20,
            transfer_amount: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FluidConfig {
    pub tick_delay: u64,
    /// Volume moved per channel each time the fluid algorithm runs.
    pub transfer_rate: u64,
}

impl Default for FluidConfig {
    fn default() -> Self {
        Self {
            tick_delay: 1,
            transfer_rate: 1000,
        }
    }
}

// ===========================================================================
// EngineConfig
// ===========================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub energy: EnergyConfig,
    pub item: ItemConfig,
    pub fluid: FluidConfig,
    /// Run the worker phases of independent clusters on a thread pool.
    pub parallel: bool,
    /// Pool size; 0 lets rayon decide.
    pub worker_threads: usize,
    /// Seed for cluster tick offsets.
    pub seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            energy: EnergyConfig::default(),
            item: ItemConfig::default(),
            fluid: FluidConfig::default(),
            parallel: true,
            worker_threads: 0,
            seed: 0,
        }
    }
}

impl EngineConfig {
    /// Load from a `.toml`, `.json` or `.ron` file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let parse_err = |detail: String| ConfigError::Parse {
            file: path.to_path_buf(),
            detail,
        };
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
            Some("json") => serde_json::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
            Some("ron") => ron::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
            _ => {
                return Err(ConfigError::UnsupportedFormat {
                    file: path.to_path_buf(),
                });
            }
        };
        Ok(config.normalized())
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            file: PathBuf::from("<inline>"),
            detail: e.to_string(),
        })?;
        Ok(config.normalized())
    }

    /// Clamp tick delays of 0 up to 1.
    pub fn normalized(mut self) -> Self {
        self.energy.tick_delay = self.energy.tick_delay.max(1);
        self.item.tick_delay = self.item.tick_delay.max(1);
        self.fluid.tick_delay = self.fluid.tick_delay.max(1);
        self
    }
}
