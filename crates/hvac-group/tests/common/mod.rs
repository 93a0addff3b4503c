//! Shared harness for HVAC group tests
//!
//! Provides a recording remote-command interface, the demo devices used
//! across scenarios, and a helper that attaches a group to a state store the
//! same way the runner does, without spawning a task.

#![allow(dead_code)]

use async_trait::async_trait;
use hvac_config::HvacGroupConfig;
use hvac_core::{ClimateEntityFeature, Context, EntityId, State};
use hvac_event_bus::EventBus;
use hvac_group::{HvacGroup, SharedHvacGroup};
use hvac_restore::SharedRestoreStore;
use hvac_service_registry::{RemoteCommand, ServiceError};
use hvac_state_store::StateStore;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const HEATER_SINGLE_TEMP: &str = "climate.heater_single_temp";
pub const HEATER_TEMP_RANGE: &str = "climate.heater_temp_range";
pub const COOLER_SINGLE_TEMP: &str = "climate.cooler_single_temp";
pub const COOLER_TEMP_RANGE: &str = "climate.cooler_temp_range";
pub const COOLER_HEATER: &str = "climate.cooler_heater";
pub const TEMP_SENSOR: &str = "sensor.temperature_sensor";

pub fn id(entity_id: &str) -> EntityId {
    entity_id.parse().expect("Invalid entity_id")
}

/// One dispatched remote command
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub domain: String,
    pub service: String,
    pub target: String,
    pub data: Value,
    pub context: Context,
}

/// Remote-command interface that records every call
#[derive(Default)]
pub struct RecordingCommander {
    calls: Mutex<Vec<RecordedCall>>,
    failing: Mutex<Vec<String>>,
}

impl RecordingCommander {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every call to `target` fail after being recorded
    pub fn fail_for(&self, target: &str) {
        self.failing.lock().unwrap().push(target.to_string());
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, target: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.target == target)
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Assert every recorded call carries the expected keys of its target
    ///
    /// Targets missing from `expected` are not checked.
    pub fn assert_calls_include(&self, expected: &[(&str, Value)]) {
        let expected: HashMap<&str, &Value> = expected.iter().map(|(k, v)| (*k, v)).collect();

        for call in self.calls() {
            let Some(Value::Object(keys)) = expected.get(call.target.as_str()).copied() else {
                continue;
            };
            for (key, value) in keys {
                assert_eq!(
                    call.data.get(key),
                    Some(value),
                    "{} expected a call with {}: {}, actual value was {}",
                    call.target,
                    key,
                    value,
                    call.data
                );
            }
        }
    }
}

#[async_trait]
impl RemoteCommand for RecordingCommander {
    async fn call(
        &self,
        domain: &str,
        service: &str,
        data: Value,
        target: &EntityId,
        context: Context,
    ) -> Result<(), ServiceError> {
        self.calls.lock().unwrap().push(RecordedCall {
            domain: domain.to_string(),
            service: service.to_string(),
            target: target.to_string(),
            data,
            context,
        });

        if self.failing.lock().unwrap().contains(&target.to_string()) {
            return Err(ServiceError::CallFailed(format!("{} is offline", target)));
        }
        Ok(())
    }
}

/// Attributes of a climate device with bounds 17..32
pub fn climate_attributes(features: ClimateEntityFeature) -> HashMap<String, Value> {
    let mut attributes = HashMap::from([
        ("min_temp".to_string(), json!("17")),
        ("max_temp".to_string(), json!("32")),
        ("supported_features".to_string(), json!(features.bits())),
    ]);
    if features.supports_range() {
        attributes.insert("target_temp_low".to_string(), json!("21"));
        attributes.insert("target_temp_high".to_string(), json!("23"));
    } else {
        attributes.insert("temperature".to_string(), json!("23"));
    }
    attributes
}

/// Isolated bus, state store and command recorder
pub struct TestHvac {
    pub bus: Arc<EventBus>,
    pub states: Arc<StateStore>,
    pub commander: Arc<RecordingCommander>,
}

impl TestHvac {
    pub fn new() -> Self {
        let bus = Arc::new(EventBus::new());
        let states = Arc::new(StateStore::new(bus.clone()));
        Self {
            bus,
            states,
            commander: RecordingCommander::new(),
        }
    }

    pub fn set_state(
        &self,
        entity_id: &str,
        state: &str,
        attributes: HashMap<String, Value>,
    ) -> State {
        self.states.set(id(entity_id), state, attributes, Context::new())
    }

    pub fn set_climate(&self, entity_id: &str, features: ClimateEntityFeature) -> State {
        self.set_state(entity_id, "off", climate_attributes(features))
    }

    /// The five demo devices, all off, and the sensor at 22.5
    pub fn set_default_devices(&self) {
        self.set_climate(COOLER_HEATER, ClimateEntityFeature::TARGET_TEMPERATURE);
        self.set_climate(COOLER_SINGLE_TEMP, ClimateEntityFeature::TARGET_TEMPERATURE);
        self.set_climate(COOLER_TEMP_RANGE, ClimateEntityFeature::TARGET_TEMPERATURE_RANGE);
        self.set_climate(HEATER_SINGLE_TEMP, ClimateEntityFeature::TARGET_TEMPERATURE);
        self.set_climate(HEATER_TEMP_RANGE, ClimateEntityFeature::TARGET_TEMPERATURE_RANGE);
        self.set_state(TEMP_SENSOR, "22.5", HashMap::new());
    }

    /// Build a group publishing into this store
    pub fn group(&self, config: &HvacGroupConfig, restore: Option<SharedRestoreStore>) -> SharedHvacGroup {
        let mut group = HvacGroup::from_config(config, self.commander.clone())
            .expect("Invalid group config")
            .with_state_store(self.states.clone());
        if let Some(restore) = restore {
            group = group.with_restore_store(restore);
        }
        Arc::new(group)
    }

    /// Feed the group the states already in the store, then start it
    pub async fn attach(&self, group: &HvacGroup) {
        for entity_id in group.actuator_ids() {
            if let Some(state) = self.states.get(&entity_id) {
                group
                    .handle_actuator_state(&entity_id, Some(&state), None, Context::new())
                    .await
                    .unwrap();
            }
        }
        if let Some(state) = self.states.get(group.temperature_entity_id()) {
            group
                .handle_sensor_state(Some(&state), None, Context::new())
                .await
                .unwrap();
        }
        group.start().await.unwrap();
    }

    /// Change the sensor and hand the change to the group
    pub async fn set_temperature_sensor(&self, group: &HvacGroup, value: &str) {
        let old = self.states.get(&id(TEMP_SENSOR));
        let new = self.set_state(TEMP_SENSOR, value, HashMap::new());
        group
            .handle_sensor_state(Some(&new), old.as_ref(), Context::new())
            .await
            .unwrap();
    }

    /// Change a device and hand the change to the group
    pub async fn update_climate(
        &self,
        group: &HvacGroup,
        entity_id: &str,
        state: &str,
        attributes: HashMap<String, Value>,
    ) {
        let old = self.states.get(&id(entity_id));
        let new = self.set_state(entity_id, state, attributes);
        group
            .handle_actuator_state(&id(entity_id), Some(&new), old.as_ref(), Context::new())
            .await
            .unwrap();
    }
}

/// Group of the five demo devices, toggles off
pub fn default_config() -> HvacGroupConfig {
    let mut config = HvacGroupConfig::new(id(TEMP_SENSOR));
    config.name = "Test HVAC".to_string();
    config.heaters = vec![id(HEATER_SINGLE_TEMP), id(HEATER_TEMP_RANGE), id(COOLER_HEATER)];
    config.coolers = vec![id(COOLER_SINGLE_TEMP), id(COOLER_TEMP_RANGE), id(COOLER_HEATER)];
    config
}

pub fn group_entity_id() -> EntityId {
    id("climate.test_hvac")
}
