//! Configuration loading for HVAC groups
//!
//! A group is configured from a flat options object: the heater and
//! cooler entity ids, the temperature sensor, per-role toggle flags and
//! the temperature bounds and precision.
//!
//! # Example
//!
//! ```ignore
//! use hvac_config::{load_file, HvacGroupConfig};
//!
//! // Every group under the `hvac_group:` key
//! let groups = load_file("hvac_group.yaml")?;
//!
//! // Or a single group from an options object
//! let group = HvacGroupConfig::from_json(options)?;
//! ```

mod error;
mod group_config;

pub use error::{ConfigError, ConfigResult};
pub use group_config::{load_file, HvacGroupConfig};
