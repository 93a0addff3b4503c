//! Core types for HVAC groups
//!
//! This crate provides the value types shared by every other crate in the
//! workspace: EntityId, State, Event, Context, ServiceCall, and the climate
//! vocabulary (modes, actions, feature flags, attribute and service names).

pub mod climate;
mod context;
mod entity_id;
mod event;
mod service_call;
mod state;

pub use climate::{ClimateEntityFeature, HvacAction, HvacMode, ParseHvacModeError};
pub use context::Context;
pub use entity_id::{EntityId, EntityIdError};
pub use event::{Event, EventData, EventType};
pub use service_call::ServiceCall;
pub use state::{State, StateDiff};

/// Standard event types
pub mod events {
    use super::*;

    /// Event type for state changes
    pub const STATE_CHANGED: &str = "state_changed";

    /// Data for STATE_CHANGED events
    ///
    /// `new_state` is `None` when the entity was removed.
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct StateChangedData {
        pub entity_id: EntityId,
        pub old_state: Option<State>,
        pub new_state: Option<State>,
    }

    impl EventData for StateChangedData {
        fn event_type() -> &'static str {
            STATE_CHANGED
        }
    }
}
