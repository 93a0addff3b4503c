//! State a group exposes upward

use hvac_core::{climate, ClimateEntityFeature, HvacAction, HvacMode};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Read-only view of a group, recomputed after every committed pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExposedState {
    pub friendly_name: String,
    pub current_temperature: Option<f64>,
    pub hvac_mode: Option<HvacMode>,
    pub hvac_action: HvacAction,
    pub target_temperature: Option<f64>,
    pub target_temp_low: Option<f64>,
    pub target_temp_high: Option<f64>,
    pub min_temp: f64,
    pub max_temp: f64,
    pub hvac_modes: Vec<HvacMode>,
    pub supported_features: ClimateEntityFeature,
    pub precision: f64,
    pub target_temp_step: f64,
    pub temperature_unit: String,
}

impl ExposedState {
    /// What the group is doing given its mode and last pass
    pub fn action(mode: Option<HvacMode>, is_heating: bool, is_cooling: bool) -> HvacAction {
        if mode == Some(HvacMode::Off) {
            HvacAction::Off
        } else if is_heating {
            HvacAction::Heating
        } else if is_cooling {
            HvacAction::Cooling
        } else {
            HvacAction::Idle
        }
    }

    /// State value: the mode, or `unknown` before one is set
    pub fn state(&self) -> String {
        self.hvac_mode
            .map(|mode| mode.as_str().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Attributes as written to the state store
    ///
    /// A ranged group exposes `target_temp_low`/`target_temp_high`, a
    /// single-target group exposes `temperature`.
    pub fn attributes(&self) -> HashMap<String, Value> {
        let mut attributes = HashMap::from([
            (climate::ATTR_FRIENDLY_NAME.to_string(), json!(self.friendly_name)),
            (
                climate::ATTR_CURRENT_TEMPERATURE.to_string(),
                json!(self.current_temperature),
            ),
            (climate::ATTR_HVAC_ACTION.to_string(), json!(self.hvac_action)),
            (climate::ATTR_HVAC_MODES.to_string(), json!(self.hvac_modes)),
            (climate::ATTR_MIN_TEMP.to_string(), json!(self.min_temp)),
            (climate::ATTR_MAX_TEMP.to_string(), json!(self.max_temp)),
            (climate::ATTR_PRECISION.to_string(), json!(self.precision)),
            (
                climate::ATTR_TARGET_TEMP_STEP.to_string(),
                json!(self.target_temp_step),
            ),
            (
                climate::ATTR_SUPPORTED_FEATURES.to_string(),
                json!(self.supported_features.bits()),
            ),
            ("temperature_unit".to_string(), json!(self.temperature_unit)),
        ]);

        if self.supported_features.supports_range() {
            attributes.insert(
                climate::ATTR_TARGET_TEMP_LOW.to_string(),
                json!(self.target_temp_low),
            );
            attributes.insert(
                climate::ATTR_TARGET_TEMP_HIGH.to_string(),
                json!(self.target_temp_high),
            );
        } else {
            attributes.insert(
                climate::ATTR_TEMPERATURE.to_string(),
                json!(self.target_temperature),
            );
        }

        attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exposed(features: ClimateEntityFeature) -> ExposedState {
        ExposedState {
            friendly_name: "Living room".into(),
            current_temperature: Some(22.5),
            hvac_mode: Some(HvacMode::HeatCool),
            hvac_action: HvacAction::Idle,
            target_temperature: None,
            target_temp_low: Some(21.0),
            target_temp_high: Some(23.0),
            min_temp: 17.0,
            max_temp: 32.0,
            hvac_modes: vec![HvacMode::Off, HvacMode::HeatCool],
            supported_features: features,
            precision: 0.1,
            target_temp_step: 0.5,
            temperature_unit: "°C".into(),
        }
    }

    #[test]
    fn test_action_follows_mode_then_flags() {
        assert_eq!(ExposedState::action(Some(HvacMode::Off), true, false), HvacAction::Off);
        assert_eq!(ExposedState::action(Some(HvacMode::Heat), true, false), HvacAction::Heating);
        assert_eq!(ExposedState::action(Some(HvacMode::Cool), false, true), HvacAction::Cooling);
        assert_eq!(ExposedState::action(None, false, false), HvacAction::Idle);
    }

    #[test]
    fn test_ranged_attributes() {
        let state = exposed(ClimateEntityFeature::TARGET_TEMPERATURE_RANGE);
        let attributes = state.attributes();

        assert_eq!(state.state(), "heat_cool");
        assert_eq!(attributes["target_temp_low"], json!(21.0));
        assert_eq!(attributes["target_temp_high"], json!(23.0));
        assert_eq!(attributes["hvac_modes"], json!(["off", "heat_cool"]));
        assert_eq!(attributes["hvac_action"], json!("idle"));
        assert_eq!(attributes["supported_features"], json!(2));
        assert!(!attributes.contains_key("temperature"));
    }

    #[test]
    fn test_single_target_attributes() {
        let mut state = exposed(ClimateEntityFeature::TARGET_TEMPERATURE);
        state.hvac_mode = None;
        state.target_temperature = Some(22.0);

        let attributes = state.attributes();
        assert_eq!(state.state(), "unknown");
        assert_eq!(attributes["temperature"], json!(22.0));
        assert!(!attributes.contains_key("target_temp_low"));
    }
}
