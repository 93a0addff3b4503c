//! Capability and limits negotiation
//!
//! A group's bounds are the intersection of its actuators' reported bounds,
//! and its mode list grows as actuators of each role report for the first
//! time. Once both roles are present the group switches to a low/high range.

use hvac_core::{ClimateEntityFeature, HvacMode};
use tracing::debug;

use crate::actuator::ActuatorRole;
use crate::command::Setpoint;

/// Bounds, modes and feature flags a group offers
#[derive(Debug, Clone, PartialEq)]
pub struct Capabilities {
    pub min_temp: f64,
    pub max_temp: f64,
    pub hvac_modes: Vec<HvacMode>,
    pub supported_features: ClimateEntityFeature,
}

impl Capabilities {
    /// Capabilities of a group no actuator has reported to yet: only `Off`
    pub fn new(min_temp: f64, max_temp: f64) -> Self {
        Self {
            min_temp,
            max_temp,
            hvac_modes: vec![HvacMode::Off],
            supported_features: ClimateEntityFeature::default(),
        }
    }

    pub fn is_ranged(&self) -> bool {
        self.supported_features.supports_range()
    }

    pub fn supports_mode(&self, mode: HvacMode) -> bool {
        self.hvac_modes.contains(&mode)
    }

    /// Narrow the bounds with the ones an actuator reported
    ///
    /// The minimum never exceeds the reported maximum and the maximum never
    /// drops under the reported minimum. Missing values leave the bound as
    /// is. Returns whether anything changed.
    pub fn negotiate_bounds(&mut self, reported_min: Option<f64>, reported_max: Option<f64>) -> bool {
        let mut min_temp = self.min_temp.max(reported_min.unwrap_or(self.min_temp));
        if let Some(reported_max) = reported_max {
            min_temp = min_temp.min(reported_max);
        }

        let mut max_temp = self.max_temp.min(reported_max.unwrap_or(self.max_temp));
        if let Some(reported_min) = reported_min {
            max_temp = max_temp.max(reported_min);
        }

        let changed = min_temp != self.min_temp || max_temp != self.max_temp;
        if changed {
            debug!(
                min_temp,
                max_temp,
                ?reported_min,
                ?reported_max,
                "Negotiated group bounds"
            );
        }
        self.min_temp = min_temp;
        self.max_temp = max_temp;
        changed
    }

    /// Pull stored targets back inside the bounds
    ///
    /// A range pushed past itself by the new bounds collapses onto its low
    /// end, so `low <= high` keeps holding.
    pub fn clamp_setpoint(&self, setpoint: &mut Setpoint) {
        if let Some(low) = setpoint.target_temp_low.as_mut() {
            *low = self.clamp(*low);
        }
        if let Some(high) = setpoint.target_temp_high.as_mut() {
            *high = self.clamp(*high);
        }
        if let (Some(low), Some(high)) = (setpoint.target_temp_low, setpoint.target_temp_high) {
            if low > high {
                setpoint.target_temp_high = Some(low);
            }
        }
        if let Some(temperature) = setpoint.temperature.as_mut() {
            *temperature = self.clamp(*temperature);
        }
    }

    pub fn clamp(&self, temperature: f64) -> f64 {
        temperature.max(self.min_temp).min(self.max_temp)
    }

    /// Account for the first report of an actuator in `role`
    ///
    /// Adds the role's mode, or replaces the opposite single mode with
    /// `HeatCool`. The group becomes ranged when both roles are present or
    /// when the device itself takes a range. Returns true when the group
    /// just switched from a single target to a range.
    pub fn register_role(&mut self, role: ActuatorRole, device_features: ClimateEntityFeature) -> bool {
        let was_ranged = self.is_ranged();
        let required = role.mode();
        let opposite = role.opposite().mode();

        if !self.supports_mode(required) && !self.supports_mode(HvacMode::HeatCool) {
            if self.supports_mode(opposite) {
                self.hvac_modes.retain(|mode| *mode != opposite);
                self.hvac_modes.push(HvacMode::HeatCool);
                self.supported_features = ClimateEntityFeature::TARGET_TEMPERATURE_RANGE;
            } else {
                self.hvac_modes.push(required);
            }
        }

        self.supported_features = if device_features.supports_range() || self.is_ranged() {
            ClimateEntityFeature::TARGET_TEMPERATURE_RANGE
        } else {
            ClimateEntityFeature::TARGET_TEMPERATURE
        };

        debug!(
            role = %role,
            modes = ?self.hvac_modes,
            ranged = self.is_ranged(),
            "Updated group modes"
        );
        !was_ranged && self.is_ranged()
    }
}

/// Carry a single target over to a range
///
/// The single value seeds whichever bound is missing and is then cleared,
/// so exactly one form stays populated.
pub fn convert_to_range(setpoint: &mut Setpoint) {
    if let Some(temperature) = setpoint.temperature.take() {
        setpoint.target_temp_low.get_or_insert(temperature);
        setpoint.target_temp_high.get_or_insert(temperature);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hvac_core::climate::{DEFAULT_MAX_TEMP, DEFAULT_MIN_TEMP};

    const SINGLE: ClimateEntityFeature = ClimateEntityFeature::TARGET_TEMPERATURE;
    const RANGE: ClimateEntityFeature = ClimateEntityFeature::TARGET_TEMPERATURE_RANGE;

    fn defaults() -> Capabilities {
        Capabilities::new(DEFAULT_MIN_TEMP, DEFAULT_MAX_TEMP)
    }

    #[test]
    fn test_first_report_narrows_bounds_once() {
        let mut caps = defaults();

        assert!(caps.negotiate_bounds(Some(17.0), Some(32.0)));
        assert_eq!((caps.min_temp, caps.max_temp), (17.0, 32.0));

        assert!(!caps.negotiate_bounds(Some(17.0), Some(32.0)));
        assert_eq!((caps.min_temp, caps.max_temp), (17.0, 32.0));
    }

    #[test]
    fn test_bounds_intersect_across_actuators() {
        let mut caps = defaults();
        caps.negotiate_bounds(Some(20.0), Some(30.0));
        caps.negotiate_bounds(Some(15.0), Some(32.0));

        assert_eq!((caps.min_temp, caps.max_temp), (20.0, 30.0));
    }

    #[test]
    fn test_disjoint_ranges_never_cross() {
        let mut caps = defaults();
        caps.negotiate_bounds(Some(10.0), Some(15.0));
        caps.negotiate_bounds(Some(20.0), Some(25.0));

        assert!(caps.min_temp <= caps.max_temp);
        assert_eq!((caps.min_temp, caps.max_temp), (20.0, 20.0));
    }

    #[test]
    fn test_missing_bound_is_kept() {
        let mut caps = defaults();
        assert!(caps.negotiate_bounds(Some(10.0), None));
        assert_eq!((caps.min_temp, caps.max_temp), (10.0, DEFAULT_MAX_TEMP));
        assert!(!caps.negotiate_bounds(None, None));
    }

    #[test]
    fn test_clamp_setpoint() {
        let mut caps = defaults();
        caps.negotiate_bounds(Some(17.0), Some(32.0));

        let mut range = Setpoint::range(7.0, 35.0);
        caps.clamp_setpoint(&mut range);
        assert_eq!(range, Setpoint::range(17.0, 32.0));

        let mut single = Setpoint::single(40.0);
        caps.clamp_setpoint(&mut single);
        assert_eq!(single, Setpoint::single(32.0));
    }

    #[test]
    fn test_range_outside_new_bounds_stays_well_formed() {
        let mut caps = defaults();
        caps.negotiate_bounds(Some(25.0), Some(30.0));

        let mut below = Setpoint::range(21.0, 23.0);
        caps.clamp_setpoint(&mut below);
        assert_eq!(below, Setpoint::range(25.0, 25.0));

        let mut above = Setpoint::range(31.0, 34.0);
        caps.clamp_setpoint(&mut above);
        assert_eq!(above, Setpoint::range(30.0, 30.0));
    }

    #[test]
    fn test_both_roles_switch_to_range() {
        let mut caps = defaults();

        assert!(!caps.register_role(ActuatorRole::Heater, SINGLE));
        assert_eq!(caps.hvac_modes, vec![HvacMode::Off, HvacMode::Heat]);
        assert_eq!(caps.supported_features, SINGLE);

        assert!(!caps.register_role(ActuatorRole::Heater, SINGLE));
        assert_eq!(caps.hvac_modes.len(), 2);

        assert!(caps.register_role(ActuatorRole::Cooler, SINGLE));
        assert_eq!(caps.hvac_modes, vec![HvacMode::Off, HvacMode::HeatCool]);
        assert!(caps.is_ranged());

        // Stays ranged once switched
        assert!(!caps.register_role(ActuatorRole::Cooler, SINGLE));
        assert!(caps.is_ranged());
    }

    #[test]
    fn test_range_device_makes_group_ranged() {
        let mut caps = defaults();

        assert!(caps.register_role(ActuatorRole::Cooler, RANGE));
        assert_eq!(caps.hvac_modes, vec![HvacMode::Off, HvacMode::Cool]);
        assert!(caps.supports_mode(HvacMode::Cool));
        assert!(!caps.supports_mode(HvacMode::Heat));
    }

    #[test]
    fn test_convert_to_range() {
        let mut setpoint = Setpoint::single(22.0);
        convert_to_range(&mut setpoint);
        assert_eq!(setpoint, Setpoint::range(22.0, 22.0));

        let mut partial = Setpoint {
            temperature: Some(22.0),
            target_temp_low: Some(19.0),
            target_temp_high: None,
        };
        convert_to_range(&mut partial);
        assert_eq!(partial, Setpoint::range(19.0, 22.0));
    }
}
