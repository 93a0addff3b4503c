//! Entity state storage for HVAC groups
//!
//! This crate provides the StateStore, which holds the last reported state
//! of every device, sensor and group. Every write fires a `state_changed`
//! event on the event bus, which is how groups learn about device updates.

use dashmap::DashMap;
use hvac_core::events::StateChangedData;
use hvac_core::{Context, EntityId, State};
use hvac_event_bus::EventBus;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, trace};

/// The state store tracks all entity states
pub struct StateStore {
    /// All entity states keyed by entity id
    states: DashMap<EntityId, State>,
    /// Event bus for firing state change events
    event_bus: Arc<EventBus>,
}

impl StateStore {
    /// Create a new state store with the given event bus
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            states: DashMap::new(),
            event_bus,
        }
    }

    /// Set the state of an entity
    ///
    /// If the entity already has a state, the `last_changed` timestamp will
    /// only be updated if the state value actually changed.
    ///
    /// Fires a STATE_CHANGED event with the old and new state.
    #[instrument(skip(self, state, attributes, context), fields(entity_id = %entity_id))]
    pub fn set(
        &self,
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> State {
        let old_state = self.states.get(&entity_id).map(|s| s.clone());

        let new_state = match &old_state {
            Some(existing) => existing.with_update(state, attributes, context.clone()),
            None => State::new(entity_id.clone(), state, attributes, context.clone()),
        };

        debug!(
            state = %new_state.state,
            changed = old_state.as_ref().map(|s| s.state != new_state.state).unwrap_or(true),
            "Setting entity state"
        );

        self.states.insert(entity_id.clone(), new_state.clone());

        self.event_bus.fire_typed(
            StateChangedData {
                entity_id,
                old_state,
                new_state: Some(new_state.clone()),
            },
            context,
        );

        new_state
    }

    /// Get the current state of an entity
    pub fn get(&self, entity_id: &EntityId) -> Option<State> {
        self.states.get(entity_id).map(|s| s.clone())
    }

    /// Get all states
    pub fn all(&self) -> Vec<State> {
        self.states.iter().map(|r| r.value().clone()).collect()
    }

    /// Remove an entity's state
    ///
    /// Fires a STATE_CHANGED event with the old state and None for new_state.
    #[instrument(skip(self, context), fields(entity_id = %entity_id))]
    pub fn remove(&self, entity_id: &EntityId, context: Context) -> Option<State> {
        let old_state = self.states.remove(entity_id).map(|(_, s)| s);

        if let Some(ref state) = old_state {
            trace!("Removing entity state");
            self.event_bus.fire_typed(
                StateChangedData {
                    entity_id: entity_id.clone(),
                    old_state: Some(state.clone()),
                    new_state: None,
                },
                context,
            );
        }

        old_state
    }

    /// Get the total number of entities
    pub fn entity_count(&self) -> usize {
        self.states.len()
    }
}

/// Thread-safe wrapper for StateStore
pub type SharedStateStore = Arc<StateStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup() -> (Arc<EventBus>, StateStore) {
        let bus = Arc::new(EventBus::new());
        let store = StateStore::new(bus.clone());
        (bus, store)
    }

    #[test]
    fn test_set_and_get_state() {
        let (_, store) = setup();
        let id: EntityId = "climate.heater".parse().unwrap();
        let attrs = HashMap::from([("min_temp".to_string(), json!(17))]);

        store.set(id.clone(), "off", attrs.clone(), Context::new());

        let state = store.get(&id).unwrap();
        assert_eq!(state.state, "off");
        assert_eq!(state.attributes, attrs);
        assert_eq!(store.entity_count(), 1);
    }

    #[test]
    fn test_update_preserves_last_changed_for_same_value() {
        let (_, store) = setup();
        let id: EntityId = "sensor.temperature".parse().unwrap();

        let first = store.set(id.clone(), "21", HashMap::new(), Context::new());
        let second = store.set(id.clone(), "21", HashMap::new(), Context::new());
        assert_eq!(first.last_changed, second.last_changed);
    }

    #[tokio::test]
    async fn test_set_fires_state_change_with_old_state() {
        let (bus, store) = setup();
        let id: EntityId = "climate.cooler".parse().unwrap();
        let mut rx = bus.track_state_changes([id.clone()]);

        store.set(id.clone(), "off", HashMap::new(), Context::new());
        store.set(id.clone(), "cool", HashMap::new(), Context::new());

        let first = rx.recv().await.unwrap();
        assert!(first.data.old_state.is_none());

        let second = rx.recv().await.unwrap();
        assert_eq!(second.data.old_state.unwrap().state, "off");
        assert_eq!(second.data.new_state.unwrap().state, "cool");
    }

    #[tokio::test]
    async fn test_remove_fires_empty_new_state() {
        let (bus, store) = setup();
        let id: EntityId = "climate.cooler".parse().unwrap();
        store.set(id.clone(), "off", HashMap::new(), Context::new());

        let mut rx = bus.track_state_changes([id.clone()]);
        assert!(store.remove(&id, Context::new()).is_some());

        let event = rx.recv().await.unwrap();
        assert!(event.data.new_state.is_none());
        assert!(store.get(&id).is_none());
    }
}
