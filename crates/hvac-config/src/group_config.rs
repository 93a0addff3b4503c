//! HVAC group options
//!
//! Parses one group's flat options object, or the `hvac_group:` list of a
//! server configuration file.

use hvac_core::climate::{DEFAULT_MAX_TEMP, DEFAULT_MIN_TEMP, PRECISION_HALVES, PRECISION_TENTHS};
use hvac_core::EntityId;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{ConfigError, ConfigResult};

/// Options exactly as written by the user, before validation
#[derive(Debug, Clone, Deserialize)]
struct RawGroupConfig {
    #[serde(default = "default_name")]
    name: String,

    #[serde(default)]
    unique_id: Option<String>,

    #[serde(default)]
    heaters: Vec<String>,

    #[serde(default)]
    coolers: Vec<String>,

    #[serde(default)]
    toggle_heaters: bool,

    #[serde(default)]
    toggle_coolers: bool,

    #[serde(alias = "temperature_sensor_id")]
    temperature_entity_id: String,

    #[serde(default)]
    min_temp: Option<f64>,

    #[serde(default)]
    max_temp: Option<f64>,

    #[serde(default)]
    precision: Option<f64>,

    #[serde(default)]
    target_temperature_step: Option<f64>,

    #[serde(default = "default_temperature_unit")]
    temperature_unit: String,

    #[serde(default)]
    hide_members: bool,
}

/// Validated configuration of one HVAC group
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HvacGroupConfig {
    /// Display name, also the object id of the group entity
    pub name: String,

    /// Stable identifier, used as the restore key when set
    pub unique_id: Option<String>,

    /// Heating devices, de-duplicated, in configured order
    pub heaters: Vec<EntityId>,

    /// Cooling devices, de-duplicated, in configured order
    pub coolers: Vec<EntityId>,

    /// Switch heaters on/off when the temperature crosses the target
    pub toggle_heaters: bool,

    /// Switch coolers on/off when the temperature crosses the target
    pub toggle_coolers: bool,

    /// Sensor (or climate entity) supplying the current temperature
    pub temperature_entity_id: EntityId,

    pub min_temp: f64,
    pub max_temp: f64,
    pub precision: f64,

    /// Step offered to the user; `None` falls back to `precision`
    pub target_temperature_step: Option<f64>,

    pub temperature_unit: String,

    /// Informational only
    pub hide_members: bool,
}

fn default_name() -> String {
    "HVAC group".to_string()
}

fn default_temperature_unit() -> String {
    "°C".to_string()
}

impl HvacGroupConfig {
    /// Minimal configuration for a sensor, with every option at its default
    pub fn new(temperature_entity_id: EntityId) -> Self {
        Self {
            name: default_name(),
            unique_id: None,
            heaters: Vec::new(),
            coolers: Vec::new(),
            toggle_heaters: false,
            toggle_coolers: false,
            temperature_entity_id,
            min_temp: DEFAULT_MIN_TEMP,
            max_temp: DEFAULT_MAX_TEMP,
            precision: PRECISION_TENTHS,
            target_temperature_step: Some(PRECISION_HALVES),
            temperature_unit: default_temperature_unit(),
            hide_members: false,
        }
    }

    /// Parse a flat JSON options object
    pub fn from_json(value: serde_json::Value) -> ConfigResult<Self> {
        let raw: RawGroupConfig = serde_json::from_value(value)?;
        raw.validate()
    }

    /// Parse a single group from a YAML document
    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let raw: RawGroupConfig =
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseYaml {
                path: "<inline>".into(),
                source: e,
            })?;
        raw.validate()
    }

    /// Parse a single group from an already loaded YAML value
    pub fn from_yaml(value: Value) -> ConfigResult<Self> {
        let raw: RawGroupConfig =
            serde_yaml::from_value(value).map_err(|e| ConfigError::InvalidValue {
                key: "hvac_group".to_string(),
                reason: e.to_string(),
            })?;
        raw.validate()
    }

    /// Object id of the group entity, derived from the unique id or the name
    pub fn object_id(&self) -> String {
        let source = self.unique_id.as_deref().unwrap_or(&self.name);
        let slug: String = source
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let slug = slug.trim_matches('_').to_string();
        if slug.is_empty() {
            "hvac_group".to_string()
        } else {
            slug
        }
    }

    /// Entity id under which the group publishes its state
    pub fn entity_id(&self) -> ConfigResult<EntityId> {
        EntityId::new(hvac_core::climate::DOMAIN, self.object_id()).map_err(|e| {
            ConfigError::InvalidEntityId {
                key: "name".to_string(),
                source: e,
            }
        })
    }
}

impl RawGroupConfig {
    fn validate(self) -> ConfigResult<HvacGroupConfig> {
        let heaters = parse_entity_ids("heaters", &self.heaters)?;
        let coolers = parse_entity_ids("coolers", &self.coolers)?;

        if heaters.is_empty() && coolers.is_empty() {
            return Err(ConfigError::NoActuators { name: self.name });
        }

        let temperature_entity_id: EntityId =
            self.temperature_entity_id
                .parse()
                .map_err(|e| ConfigError::InvalidEntityId {
                    key: "temperature_entity_id".to_string(),
                    source: e,
                })?;

        let min_temp = self.min_temp.unwrap_or(DEFAULT_MIN_TEMP);
        let max_temp = self.max_temp.unwrap_or(DEFAULT_MAX_TEMP);
        if min_temp > max_temp {
            return Err(ConfigError::InvalidValue {
                key: "min_temp".to_string(),
                reason: format!("{} is above max_temp {}", min_temp, max_temp),
            });
        }

        let precision = self.precision.unwrap_or(PRECISION_TENTHS);
        if precision <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "precision".to_string(),
                reason: format!("must be positive, got {}", precision),
            });
        }

        let target_temperature_step = self.target_temperature_step.or(Some(PRECISION_HALVES));
        if matches!(target_temperature_step, Some(step) if step <= 0.0) {
            return Err(ConfigError::InvalidValue {
                key: "target_temperature_step".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        debug!(
            name = %self.name,
            heaters = heaters.len(),
            coolers = coolers.len(),
            "Loaded HVAC group configuration"
        );

        Ok(HvacGroupConfig {
            name: self.name,
            unique_id: self.unique_id,
            heaters,
            coolers,
            toggle_heaters: self.toggle_heaters,
            toggle_coolers: self.toggle_coolers,
            temperature_entity_id,
            min_temp,
            max_temp,
            precision,
            target_temperature_step,
            temperature_unit: self.temperature_unit,
            hide_members: self.hide_members,
        })
    }
}

/// Parse and de-duplicate a list of entity ids, keeping first occurrence order
fn parse_entity_ids(key: &str, ids: &[String]) -> ConfigResult<Vec<EntityId>> {
    let mut parsed: Vec<EntityId> = Vec::with_capacity(ids.len());
    for raw in ids {
        let id: EntityId = raw.trim().parse().map_err(|e| ConfigError::InvalidEntityId {
            key: key.to_string(),
            source: e,
        })?;
        if parsed.contains(&id) {
            warn!(key, entity_id = %id, "Ignoring duplicate entity id");
            continue;
        }
        parsed.push(id);
    }
    Ok(parsed)
}

/// Load every group from the `hvac_group:` list of a YAML file
pub fn load_file(path: impl AsRef<Path>) -> ConfigResult<Vec<HvacGroupConfig>> {
    let path = path.as_ref();
    debug!("Loading configuration file: {:?}", path);

    let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let value: Value = serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseYaml {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mapping = value.as_mapping().ok_or_else(|| ConfigError::InvalidValue {
        key: "root".to_string(),
        reason: "configuration must be a mapping".to_string(),
    })?;

    let groups = match mapping.get(&Value::String("hvac_group".to_string())) {
        Some(Value::Sequence(groups)) => groups.clone(),
        Some(single @ Value::Mapping(_)) => vec![single.clone()],
        Some(_) => {
            return Err(ConfigError::InvalidValue {
                key: "hvac_group".to_string(),
                reason: "expected a list of groups".to_string(),
            })
        }
        None => Vec::new(),
    };

    groups.into_iter().map(HvacGroupConfig::from_yaml).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = HvacGroupConfig::from_json(json!({
            "heaters": ["climate.heater"],
            "temperature_entity_id": "sensor.temperature",
        }))
        .unwrap();

        assert_eq!(config.name, "HVAC group");
        assert_eq!(config.min_temp, 7.0);
        assert_eq!(config.max_temp, 35.0);
        assert_eq!(config.precision, 0.1);
        assert_eq!(config.target_temperature_step, Some(0.5));
        assert_eq!(config.temperature_unit, "°C");
        assert!(!config.toggle_heaters);
        assert!(config.coolers.is_empty());
    }

    #[test]
    fn test_sensor_alias_and_dedup() {
        let config = HvacGroupConfig::from_json(json!({
            "name": "Living room",
            "heaters": ["climate.a", "climate.a", "climate.b"],
            "coolers": ["climate.a"],
            "temperature_sensor_id": "sensor.living_room",
        }))
        .unwrap();

        assert_eq!(config.heaters.len(), 2);
        assert_eq!(config.coolers.len(), 1);
        assert_eq!(config.temperature_entity_id.to_string(), "sensor.living_room");
        assert_eq!(config.entity_id().unwrap().to_string(), "climate.living_room");
    }

    #[test]
    fn test_validation_errors() {
        let err = HvacGroupConfig::from_json(json!({
            "temperature_entity_id": "sensor.temperature",
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigError::NoActuators { .. }));

        let err = HvacGroupConfig::from_json(json!({
            "heaters": ["not-an-entity"],
            "temperature_entity_id": "sensor.temperature",
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEntityId { ref key, .. } if key == "heaters"));

        let err = HvacGroupConfig::from_json(json!({
            "heaters": ["climate.heater"],
            "temperature_entity_id": "sensor.temperature",
            "min_temp": 30,
            "max_temp": 20,
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "min_temp"));

        let err = HvacGroupConfig::from_json(json!({
            "heaters": ["climate.heater"],
            "temperature_entity_id": "sensor.temperature",
            "precision": 0,
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "precision"));
    }

    #[test]
    fn test_from_yaml_str() {
        let config = HvacGroupConfig::from_yaml_str(
            r#"
name: Office
heaters: [climate.radiator]
coolers: [climate.split]
toggle_coolers: true
temperature_entity_id: climate.split
min_temp: 16
precision: 0.5
"#,
        )
        .unwrap();

        assert_eq!(config.name, "Office");
        assert!(config.toggle_coolers);
        assert_eq!(config.min_temp, 16.0);
        assert_eq!(config.precision, 0.5);
    }

    #[test]
    fn test_load_file_reads_group_list() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
hvac_group:
  - name: Bedroom
    unique_id: bedroom_hvac
    heaters: [climate.bedroom_radiator]
    temperature_entity_id: sensor.bedroom
  - name: Kitchen
    coolers: [climate.kitchen_ac]
    temperature_entity_id: sensor.kitchen
"#
        )
        .unwrap();

        let groups = load_file(file.path()).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].object_id(), "bedroom_hvac");
        assert_eq!(groups[1].object_id(), "kitchen");
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_file("/nonexistent/hvac.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }
}
