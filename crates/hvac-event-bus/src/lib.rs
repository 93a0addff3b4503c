//! Event bus with typed pub/sub
//!
//! The bus is the state feed of an HVAC group: the state store fires a
//! `state_changed` event for every write, and each group subscribes to the
//! subset of entities it cares about (its temperature sensor and its
//! actuators) through [`EventBus::track_state_changes`].

use dashmap::DashMap;
use hvac_core::events::StateChangedData;
use hvac_core::{Context, EntityId, Event, EventData, EventType};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

/// Default channel capacity for event subscriptions
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// The event bus for publishing and subscribing to events
pub struct EventBus {
    /// Map of event types to their broadcast senders
    listeners: DashMap<EventType, broadcast::Sender<Event<serde_json::Value>>>,
    /// Channel capacity
    capacity: usize,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with specified channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            listeners: DashMap::new(),
            capacity,
        }
    }

    /// Subscribe to events of a specific type
    pub fn subscribe(
        &self,
        event_type: impl Into<EventType>,
    ) -> broadcast::Receiver<Event<serde_json::Value>> {
        let event_type = event_type.into();
        trace!(event_type = %event_type, "Subscribing to event type");

        self.listeners
            .entry(event_type)
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel(self.capacity);
                tx
            })
            .subscribe()
    }

    /// Subscribe to state changes of a set of entities
    ///
    /// Every subscription is independent: a group may track its sensor and
    /// its actuators through separate receivers.
    pub fn track_state_changes<I>(&self, entity_ids: I) -> StateChangeReceiver
    where
        I: IntoIterator<Item = EntityId>,
    {
        let entity_ids: HashSet<EntityId> = entity_ids.into_iter().collect();
        debug!(count = entity_ids.len(), "Tracking state changes");
        StateChangeReceiver {
            rx: self.subscribe(StateChangedData::event_type()),
            entity_ids,
        }
    }

    /// Fire an event to all subscribers of its type
    pub fn fire(&self, event: Event<serde_json::Value>) {
        trace!(event_type = %event.event_type, "Firing event");

        if let Some(sender) = self.listeners.get(&event.event_type) {
            // Ignore send errors - they just mean no active receivers
            let _ = sender.send(event);
        }
    }

    /// Fire a typed event
    pub fn fire_typed<T: EventData + serde::Serialize>(&self, data: T, context: Context) {
        let event = Event::typed(data, context);
        match serde_json::to_value(&event.data) {
            Ok(json) => self.fire(event.map(|_| json)),
            Err(e) => warn!(event_type = %event.event_type, error = %e, "Dropping unserializable event"),
        }
    }

    /// Get the number of event types with subscribers
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A receiver of state changes for a fixed set of entities
pub struct StateChangeReceiver {
    rx: broadcast::Receiver<Event<serde_json::Value>>,
    entity_ids: HashSet<EntityId>,
}

impl StateChangeReceiver {
    /// Receive the next state change of a tracked entity
    ///
    /// Events for other entities, and events whose payload cannot be
    /// decoded, are skipped.
    pub async fn recv(&mut self) -> Result<Event<StateChangedData>, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            match serde_json::from_value::<StateChangedData>(event.data.clone()) {
                Ok(data) if self.entity_ids.contains(&data.entity_id) => {
                    return Ok(event.map(|_| data));
                }
                Ok(_) => continue,
                Err(e) => {
                    trace!(error = %e, "Skipping undecodable state change");
                }
            }
        }
    }

    /// Entities this receiver is tracking
    pub fn entity_ids(&self) -> &HashSet<EntityId> {
        &self.entity_ids
    }
}

/// Thread-safe wrapper for EventBus
pub type SharedEventBus = Arc<EventBus>;

#[cfg(test)]
mod tests {
    use super::*;
    use hvac_core::State;
    use serde_json::json;
    use std::collections::HashMap;

    fn change(entity_id: &str, value: &str) -> StateChangedData {
        let entity_id: EntityId = entity_id.parse().unwrap();
        StateChangedData {
            entity_id: entity_id.clone(),
            old_state: None,
            new_state: Some(State::new(entity_id, value, HashMap::new(), Context::new())),
        }
    }

    #[tokio::test]
    async fn test_subscribe_and_fire() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("test_event");

        bus.fire(Event::new("test_event", json!({"key": "value"}), Context::new()));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type.as_str(), "test_event");
        assert_eq!(received.data["key"], "value");
    }

    #[tokio::test]
    async fn test_track_state_changes_filters_entities() {
        let bus = EventBus::new();
        let mut rx = bus.track_state_changes(["sensor.temperature".parse().unwrap()]);

        bus.fire_typed(change("climate.heater", "heat"), Context::new());
        bus.fire_typed(change("sensor.temperature", "21.5"), Context::new());

        let event = rx.recv().await.unwrap();
        assert_eq!(event.data.entity_id.to_string(), "sensor.temperature");
        assert_eq!(event.data.new_state.unwrap().state, "21.5");
    }

    #[tokio::test]
    async fn test_independent_subscriptions() {
        let bus = EventBus::new();
        let mut sensors = bus.track_state_changes(["sensor.temperature".parse().unwrap()]);
        let mut actuators = bus.track_state_changes([
            "climate.heater".parse().unwrap(),
            "climate.cooler".parse().unwrap(),
        ]);

        let ctx = Context::with_id("ctx-1");
        bus.fire_typed(change("climate.cooler", "cool"), ctx);
        bus.fire_typed(change("sensor.temperature", "25"), Context::new());

        let event = actuators.recv().await.unwrap();
        assert_eq!(event.data.entity_id.to_string(), "climate.cooler");
        assert_eq!(event.context.id, "ctx-1");

        let event = sensors.recv().await.unwrap();
        assert_eq!(event.data.entity_id.to_string(), "sensor.temperature");
    }

    #[tokio::test]
    async fn test_no_cross_event_pollution() {
        let bus = EventBus::new();
        let _rx_a = bus.subscribe("event_a");
        let mut rx_b = bus.subscribe("event_b");

        bus.fire(Event::new("event_a", json!({}), Context::new()));

        assert!(rx_b.try_recv().is_err());
        assert_eq!(bus.listener_count(), 2);
    }
}
