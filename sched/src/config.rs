//! Scheduler Configuration Structures
//!
//! HARQ-related parameters of the MAC scheduler, loadable from the YAML
//! configuration of the base station.

use common::types::DuplexMode;
use serde::{Deserialize, Serialize};

use crate::{SchedError, FDD_HARQ_DELAY_DL_MS};

/// HARQ configuration of the MAC scheduler
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedConfig {
    /// Duplex mode of the cell; the fixed feedback delays assume FDD
    #[serde(default = "default_duplex_mode")]
    pub duplex_mode: DuplexMode,
    /// Number of downlink HARQ processes per user
    #[serde(default = "default_nof_harqs")]
    pub nof_dl_harqs: usize,
    /// Number of uplink HARQ processes per user
    #[serde(default = "default_nof_harqs")]
    pub nof_ul_harqs: usize,
    /// Asynchronous downlink process selection
    #[serde(default)]
    pub is_async: bool,
    /// Slots between a downlink transmission and its HARQ feedback
    #[serde(default = "default_harq_delay")]
    pub fdd_harq_delay_dl_ms: u32,
    /// Default retransmission cap handed to new transmissions
    #[serde(default = "default_max_retx")]
    pub harq_max_retx: u32,
}

fn default_duplex_mode() -> DuplexMode {
    DuplexMode::Fdd
}

fn default_nof_harqs() -> usize {
    8
}

fn default_harq_delay() -> u32 {
    FDD_HARQ_DELAY_DL_MS
}

fn default_max_retx() -> u32 {
    4
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self {
            duplex_mode: default_duplex_mode(),
            nof_dl_harqs: default_nof_harqs(),
            nof_ul_harqs: default_nof_harqs(),
            is_async: false,
            fdd_harq_delay_dl_ms: default_harq_delay(),
            harq_max_retx: default_max_retx(),
        }
    }
}

impl SchedConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &str) -> Result<Self, SchedError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SchedError::InvalidConfiguration(format!("{}: {}", path, e)))?;
        let config: SchedConfig = serde_yaml::from_str(&contents)
            .map_err(|e| SchedError::InvalidConfiguration(format!("{}: {}", path, e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the process banks are buildable
    pub fn validate(&self) -> Result<(), SchedError> {
        if self.duplex_mode != DuplexMode::Fdd {
            return Err(SchedError::InvalidConfiguration(
                "only FDD operation is supported".into(),
            ));
        }
        if self.nof_dl_harqs == 0 {
            return Err(SchedError::InvalidConfiguration(
                "nof_dl_harqs must be at least 1".into(),
            ));
        }
        if self.nof_ul_harqs == 0 {
            return Err(SchedError::InvalidConfiguration(
                "nof_ul_harqs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
