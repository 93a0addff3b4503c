//! Climate vocabulary: modes, actions, feature flags, attributes and services

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Domain of climate devices
pub const DOMAIN: &str = "climate";

/// Service that changes the operating mode of a device
pub const SERVICE_SET_HVAC_MODE: &str = "set_hvac_mode";
/// Service that changes the target temperature (and optionally the mode)
pub const SERVICE_SET_TEMPERATURE: &str = "set_temperature";

pub const ATTR_CURRENT_TEMPERATURE: &str = "current_temperature";
pub const ATTR_HVAC_ACTION: &str = "hvac_action";
pub const ATTR_HVAC_MODE: &str = "hvac_mode";
pub const ATTR_HVAC_MODES: &str = "hvac_modes";
pub const ATTR_MAX_TEMP: &str = "max_temp";
pub const ATTR_MIN_TEMP: &str = "min_temp";
pub const ATTR_PRECISION: &str = "precision";
pub const ATTR_SUPPORTED_FEATURES: &str = "supported_features";
pub const ATTR_TARGET_TEMP_HIGH: &str = "target_temp_high";
pub const ATTR_TARGET_TEMP_LOW: &str = "target_temp_low";
pub const ATTR_TARGET_TEMP_STEP: &str = "target_temp_step";
pub const ATTR_TEMPERATURE: &str = "temperature";
pub const ATTR_FRIENDLY_NAME: &str = "friendly_name";

pub const DEFAULT_MIN_TEMP: f64 = 7.0;
pub const DEFAULT_MAX_TEMP: f64 = 35.0;

pub const PRECISION_TENTHS: f64 = 0.1;
pub const PRECISION_HALVES: f64 = 0.5;

/// Operating mode of a climate device or group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HvacMode {
    Off,
    Heat,
    Cool,
    HeatCool,
}

impl HvacMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            HvacMode::Off => "off",
            HvacMode::Heat => "heat",
            HvacMode::Cool => "cool",
            HvacMode::HeatCool => "heat_cool",
        }
    }

    /// Whether heaters may be switched on in this mode
    pub fn allows_heating(&self) -> bool {
        matches!(self, HvacMode::Heat | HvacMode::HeatCool)
    }

    /// Whether coolers may be switched on in this mode
    pub fn allows_cooling(&self) -> bool {
        matches!(self, HvacMode::Cool | HvacMode::HeatCool)
    }
}

impl fmt::Display for HvacMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown mode string
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown hvac mode: {0}")]
pub struct ParseHvacModeError(pub String);

impl FromStr for HvacMode {
    type Err = ParseHvacModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(HvacMode::Off),
            "heat" => Ok(HvacMode::Heat),
            "cool" => Ok(HvacMode::Cool),
            "heat_cool" => Ok(HvacMode::HeatCool),
            other => Err(ParseHvacModeError(other.to_string())),
        }
    }
}

/// What the group is currently doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HvacAction {
    Off,
    Heating,
    Cooling,
    Idle,
}

/// Supported-feature bitmask reported by climate devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClimateEntityFeature(u32);

impl ClimateEntityFeature {
    pub const TARGET_TEMPERATURE: Self = Self(1);
    pub const TARGET_TEMPERATURE_RANGE: Self = Self(2);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    /// Whether the device accepts a low/high target pair
    pub const fn supports_range(&self) -> bool {
        self.contains(Self::TARGET_TEMPERATURE_RANGE)
    }
}

impl std::ops::BitOr for ClimateEntityFeature {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}
