//! HVAC group control engine
//!
//! Coordinates a set of heating and cooling devices as one virtual
//! thermostat. Given the current temperature, the target temperature (or
//! range) and the operating mode, the group decides which actuators heat,
//! cool or idle, stages a command per actuator, and dispatches them together.
//!
//! - [`Actuator`]: one device in one role, with a single staged-command slot
//! - [`ActuatorCollection`]: ordered actuators with bulk operations
//! - [`Transaction`]: buffer that merges commands per target and service
//! - [`Capabilities`]: bounds and mode negotiation across actuators
//! - [`HvacGroup`]: the control engine
//! - [`GroupRunner`]: wires a group to the event bus and state store

mod actuator;
mod attributes;
mod collection;
mod command;
mod error;
mod group;
mod limits;
mod runner;
mod transaction;

pub use actuator::{Actuator, ActuatorRole};
pub use attributes::ExposedState;
pub use collection::ActuatorCollection;
pub use command::{ClimateCommand, ClimateService, Setpoint, StagedCommand};
pub use error::{HvacGroupError, HvacGroupResult, TransactionError, TransactionResult};
pub use group::{HvacGroup, SetTemperatureRequest, SharedHvacGroup};
pub use limits::{convert_to_range, Capabilities};
pub use runner::GroupRunner;
pub use transaction::{Transaction, TransactionAction};
