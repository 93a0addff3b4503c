//! Device commands and setpoints

use hvac_core::{climate, Context, HvacMode};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{HvacGroupError, HvacGroupResult};

/// Climate service a command is sent to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClimateService {
    SetHvacMode,
    SetTemperature,
}

impl ClimateService {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClimateService::SetHvacMode => climate::SERVICE_SET_HVAC_MODE,
            ClimateService::SetTemperature => climate::SERVICE_SET_TEMPERATURE,
        }
    }
}

impl fmt::Display for ClimateService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a climate service call
///
/// Unset fields are left out of the payload entirely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClimateCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_temp_low: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_temp_high: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hvac_mode: Option<HvacMode>,
}

impl ClimateCommand {
    pub fn mode(mode: HvacMode) -> Self {
        Self {
            hvac_mode: Some(mode),
            ..Default::default()
        }
    }

    /// Payload as a JSON object
    pub fn to_data(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }
}

/// A command computed for one actuator and held until commit
#[derive(Debug, Clone, PartialEq)]
pub struct StagedCommand {
    pub service: ClimateService,
    pub command: ClimateCommand,
    pub context: Option<Context>,
}

/// Target temperature of a group: a single value or a low/high range
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Setpoint {
    pub temperature: Option<f64>,
    pub target_temp_low: Option<f64>,
    pub target_temp_high: Option<f64>,
}

impl Setpoint {
    pub fn single(temperature: f64) -> Self {
        Self {
            temperature: Some(temperature),
            ..Default::default()
        }
    }

    pub fn range(low: f64, high: f64) -> Self {
        Self {
            temperature: None,
            target_temp_low: Some(low),
            target_temp_high: Some(high),
        }
    }

    /// Fails when a scalar temperature and any range bound are both set
    pub fn check(&self) -> HvacGroupResult<()> {
        if self.temperature.is_some()
            && (self.target_temp_low.is_some() || self.target_temp_high.is_some())
        {
            return Err(HvacGroupError::ContractViolation(format!(
                "temperature {:?} given together with range ({:?}, {:?})",
                self.temperature, self.target_temp_low, self.target_temp_high
            )));
        }
        Ok(())
    }

    /// Threshold under which the group is too cold
    pub fn low_or_temperature(&self) -> Option<f64> {
        self.target_temp_low.or(self.temperature)
    }

    /// Threshold over which the group is too hot
    pub fn high_or_temperature(&self) -> Option<f64> {
        self.target_temp_high.or(self.temperature)
    }

    pub fn is_known(&self) -> bool {
        (self.target_temp_low.is_some() && self.target_temp_high.is_some())
            || self.temperature.is_some()
    }
}

impl fmt::Display for Setpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.temperature, self.target_temp_low, self.target_temp_high) {
            (Some(t), _, _) => write!(f, "{}", t),
            (None, Some(low), Some(high)) => write!(f, "{}-{}", low, high),
            _ => f.write_str("unset"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_skips_unset_fields() {
        let command = ClimateCommand {
            temperature: Some(21.0),
            hvac_mode: Some(HvacMode::Heat),
            ..Default::default()
        };

        assert_eq!(
            serde_json::Value::Object(command.to_data()),
            json!({"temperature": 21.0, "hvac_mode": "heat"})
        );
    }

    #[test]
    fn test_setpoint_check() {
        assert!(Setpoint::single(21.0).check().is_ok());
        assert!(Setpoint::range(21.0, 23.0).check().is_ok());

        let both = Setpoint {
            temperature: Some(22.0),
            target_temp_low: Some(21.0),
            target_temp_high: None,
        };
        assert!(matches!(both.check(), Err(HvacGroupError::ContractViolation(_))));
    }

    #[test]
    fn test_thresholds() {
        let range = Setpoint::range(21.0, 23.0);
        assert_eq!(range.low_or_temperature(), Some(21.0));
        assert_eq!(range.high_or_temperature(), Some(23.0));

        let single = Setpoint::single(22.0);
        assert_eq!(single.low_or_temperature(), Some(22.0));
        assert_eq!(single.high_or_temperature(), Some(22.0));
        assert_eq!(single.to_string(), "22");
    }
}
