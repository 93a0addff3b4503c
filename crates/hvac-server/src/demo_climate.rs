//! Simulated climate devices
//!
//! Gives the server something to drive. Every configured actuator without a
//! state is created as an idle climate device, and the climate services
//! apply their payload straight to the target's state. Calls addressed to a
//! group entity are handed to that group instead.

use hvac_config::HvacGroupConfig;
use hvac_core::climate::{self, ClimateEntityFeature, HvacMode};
use hvac_core::{Context, EntityId, ServiceCall};
use hvac_group::{HvacGroupError, SetTemperatureRequest, SharedHvacGroup};
use hvac_service_registry::{ServiceError, ServiceRegistry, ServiceResult};
use hvac_state_store::{SharedStateStore, StateStore};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Groups reachable through the climate services, by entity id
pub type GroupIndex = Arc<HashMap<EntityId, SharedHvacGroup>>;

/// Create an idle device for every configured actuator that has no state
pub fn seed_devices(configs: &[HvacGroupConfig], states: &StateStore) -> usize {
    let mut count = 0;

    for config in configs {
        for entity_id in config.heaters.iter().chain(&config.coolers) {
            if entity_id.domain() != climate::DOMAIN || states.get(entity_id).is_some() {
                continue;
            }

            let attributes = HashMap::from([
                (climate::ATTR_MIN_TEMP.to_string(), json!(climate::DEFAULT_MIN_TEMP)),
                (climate::ATTR_MAX_TEMP.to_string(), json!(climate::DEFAULT_MAX_TEMP)),
                (
                    climate::ATTR_SUPPORTED_FEATURES.to_string(),
                    json!(ClimateEntityFeature::TARGET_TEMPERATURE.bits()),
                ),
            ]);
            states.set(entity_id.clone(), HvacMode::Off.as_str(), attributes, Context::new());
            debug!("Created simulated device {}", entity_id);
            count += 1;
        }
    }

    if count > 0 {
        info!("Created {} simulated climate devices", count);
    }
    count
}

/// Register climate.set_temperature and climate.set_hvac_mode
pub fn register_climate_services(services: &ServiceRegistry, states: SharedStateStore, groups: GroupIndex) {
    let states_clone = states.clone();
    let groups_clone = groups.clone();
    services.register(
        climate::DOMAIN,
        climate::SERVICE_SET_TEMPERATURE,
        move |call: ServiceCall| {
            let states = states_clone.clone();
            let groups = groups_clone.clone();
            async move { set_temperature(call, &states, &groups).await }
        },
    );

    services.register(
        climate::DOMAIN,
        climate::SERVICE_SET_HVAC_MODE,
        move |call: ServiceCall| {
            let states = states.clone();
            let groups = groups.clone();
            async move { set_hvac_mode(call, &states, &groups).await }
        },
    );
}

async fn set_temperature(
    call: ServiceCall,
    states: &StateStore,
    groups: &HashMap<EntityId, SharedHvacGroup>,
) -> ServiceResult {
    let Some(group) = groups.get(&call.target) else {
        return apply_to_device(states, call);
    };

    let request: SetTemperatureRequest = serde_json::from_value(call.service_data)
        .map_err(|e| ServiceError::InvalidData(e.to_string()))?;
    group
        .set_temperature(request, Some(call.context))
        .await
        .map_err(group_error)?;
    Ok(None)
}

async fn set_hvac_mode(
    call: ServiceCall,
    states: &StateStore,
    groups: &HashMap<EntityId, SharedHvacGroup>,
) -> ServiceResult {
    let Some(value) = call.service_data.get(climate::ATTR_HVAC_MODE) else {
        return Err(ServiceError::InvalidData("hvac_mode is required".to_string()));
    };
    let mode = parse_mode(value)?;

    match groups.get(&call.target) {
        Some(group) => {
            group
                .set_hvac_mode(mode, Some(call.context))
                .await
                .map_err(group_error)?;
            Ok(None)
        }
        None => apply_to_device(states, call),
    }
}

/// Write the commanded mode and targets into the device's state
fn apply_to_device(states: &StateStore, call: ServiceCall) -> ServiceResult {
    let Some(current) = states.get(&call.target) else {
        warn!(entity_id = %call.target, "Unknown climate device");
        return Err(ServiceError::InvalidData(format!(
            "unknown climate device: {}",
            call.target
        )));
    };
    let Value::Object(data) = call.service_data else {
        return Err(ServiceError::InvalidData("expected an object".to_string()));
    };

    let state = match data.get(climate::ATTR_HVAC_MODE) {
        Some(value) => parse_mode(value)?.to_string(),
        None => current.state.clone(),
    };

    let mut attributes = current.attributes;
    for key in [
        climate::ATTR_TEMPERATURE,
        climate::ATTR_TARGET_TEMP_LOW,
        climate::ATTR_TARGET_TEMP_HIGH,
    ] {
        if let Some(value) = data.get(key) {
            attributes.insert(key.to_string(), value.clone());
        }
    }

    debug!(entity_id = %call.target, state = %state, "Applying command to simulated device");
    states.set(call.target, state, attributes, call.context);
    Ok(None)
}

fn parse_mode(value: &Value) -> Result<HvacMode, ServiceError> {
    value
        .as_str()
        .ok_or_else(|| ServiceError::InvalidData("hvac_mode must be a string".to_string()))?
        .parse()
        .map_err(|e: climate::ParseHvacModeError| ServiceError::InvalidData(e.to_string()))
}

fn group_error(error: HvacGroupError) -> ServiceError {
    match error {
        HvacGroupError::ContractViolation(reason) => ServiceError::InvalidData(reason),
        other => ServiceError::CallFailed(other.to_string()),
    }
}
