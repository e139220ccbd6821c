//! Declarative controller configuration
//!
//! One [`ControllerConfig`] describes one device model: its USB identifiers and
//! how each logical control is read out of a raw input report. Configurations are
//! parsed from TOML and validated before they ever reach the decoder, so the
//! decoder can rely on unique control names and non-empty labels.
//!
//! ```toml
//! vendorID = 1133
//! productID = 49686
//!
//! [[joysticks]]
//! name = "left"
//! x = { pin = 1 }
//! y = { pin = 2 }
//!
//! [[buttons]]
//! name = "a"
//! pin = 5
//! value = 40
//!
//! [[status]]
//! name = "mode"
//! pin = 7
//! states = [{ value = 0, state = "digital" }, { value = 8, state = "analog" }]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Immutable description of one controller model
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    #[serde(rename = "vendorID", alias = "vendor_id")]
    pub vendor_id: u16,
    #[serde(rename = "productID", alias = "product_id")]
    pub product_id: u16,
    #[serde(default)]
    pub joysticks: Vec<JoystickSpec>,
    #[serde(default)]
    pub buttons: Vec<ButtonSpec>,
    #[serde(default, rename = "status", alias = "statuses")]
    pub statuses: Vec<StatusSpec>,
}

/// Two-axis stick read from two report bytes
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct JoystickSpec {
    pub name: String,
    pub x: PinRef,
    pub y: PinRef,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PinRef {
    pub pin: u8,
}

/// Button considered pressed while `report[pin] == value`
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ButtonSpec {
    pub name: String,
    pub pin: u8,
    pub value: u8,
}

/// Multi-valued status byte with optional labels for known values
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct StatusSpec {
    pub name: String,
    pub pin: u8,
    #[serde(default)]
    pub states: Vec<StatusLabel>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct StatusLabel {
    pub value: u8,
    pub state: String,
}

impl StatusSpec {
    /// Label for a raw value, if the configuration names one
    pub fn label_for(&self, raw: u8) -> Option<&str> {
        self.states
            .iter()
            .find(|entry| entry.value == raw)
            .map(|entry| entry.state.as_str())
    }
}

impl ControllerConfig {
    /// Parses a configuration from TOML and validates it
    pub fn from_toml(content: &str) -> Result<Self, ConfigParseError> {
        let config: ControllerConfig = toml::from_str(content)?;
        config.validate().map_err(ConfigParseError::Invalid)?;
        Ok(config)
    }

    /// Checks the invariants the decoder depends on
    ///
    /// Control names feed event channel names, so they must be non-empty, must not
    /// contain the channel separator and must be unique across joysticks, buttons
    /// and statuses combined. Pins may repeat.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for name in self.control_names() {
            if name.trim().is_empty() {
                return Err("control name must not be empty".to_string());
            }
            if name.contains(':') {
                return Err(format!("control name '{}' must not contain ':'", name));
            }
            if !seen.insert(name) {
                return Err(format!("duplicate control name '{}'", name));
            }
        }

        for status in &self.statuses {
            let mut values = HashSet::new();
            for entry in &status.states {
                if entry.state.is_empty() {
                    return Err(format!(
                        "status '{}' has an empty label for value {}",
                        status.name, entry.value
                    ));
                }
                if !values.insert(entry.value) {
                    return Err(format!(
                        "status '{}' maps value {} more than once",
                        status.name, entry.value
                    ));
                }
            }
        }

        Ok(())
    }

    /// All control names in decode order: joysticks, buttons, statuses
    pub fn control_names(&self) -> impl Iterator<Item = &str> {
        self.joysticks
            .iter()
            .map(|j| j.name.as_str())
            .chain(self.buttons.iter().map(|b| b.name.as_str()))
            .chain(self.statuses.iter().map(|s| s.name.as_str()))
    }

    /// Highest report index referenced by any control
    pub fn max_pin(&self) -> Option<u8> {
        self.joysticks
            .iter()
            .flat_map(|j| [j.x.pin, j.y.pin])
            .chain(self.buttons.iter().map(|b| b.pin))
            .chain(self.statuses.iter().map(|s| s.pin))
            .max()
    }

    /// Returns a copy with caller supplied identifiers taking precedence
    pub fn with_overrides(&self, vendor_id: Option<u16>, product_id: Option<u16>) -> Self {
        let mut config = self.clone();
        if let Some(vendor_id) = vendor_id {
            config.vendor_id = vendor_id;
        }
        if let Some(product_id) = product_id {
            config.product_id = product_id;
        }
        config
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigParseError {
    #[error("Unable to deserialize: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
