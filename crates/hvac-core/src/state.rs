//! State type representing an entity's last reported state

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::climate::{self, ClimateEntityFeature};
use crate::{Context, EntityId};

/// Represents the state of an entity at a point in time
///
/// State includes the entity's current value (as a string), any associated
/// attributes, and timestamps for when the state was last changed and updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    /// The entity this state belongs to
    pub entity_id: EntityId,

    /// The state value (e.g., "heat", "off", "23.5", "unavailable")
    pub state: String,

    /// Additional attributes associated with the state
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,

    /// When the state was last changed (different from previous state)
    pub last_changed: DateTime<Utc>,

    /// When the state was last updated (even if value didn't change)
    pub last_updated: DateTime<Utc>,

    /// Context of the change that created this state
    pub context: Context,
}

impl State {
    /// Create a new state with current timestamp
    pub fn new(
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> Self {
        let now = Utc::now();
        Self {
            entity_id,
            state: state.into(),
            attributes,
            last_changed: now,
            last_updated: now,
            context,
        }
    }

    /// Create an updated state, preserving last_changed if state value is the same
    pub fn with_update(
        &self,
        new_state: impl Into<String>,
        new_attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> Self {
        let now = Utc::now();
        let new_state = new_state.into();
        let changed = self.state != new_state;

        Self {
            entity_id: self.entity_id.clone(),
            state: new_state,
            attributes: new_attributes,
            last_changed: if changed { now } else { self.last_changed },
            last_updated: now,
            context,
        }
    }

    /// Get an attribute value by key
    pub fn attribute<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attributes
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Get a numeric attribute, accepting numbers and numeric strings
    ///
    /// Devices are not consistent here: some report `"min_temp": 17`, others
    /// `"min_temp": "17"`.
    pub fn attribute_f64(&self, key: &str) -> Option<f64> {
        match self.attributes.get(key)? {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Supported-feature bitmask, empty when not reported
    pub fn supported_features(&self) -> ClimateEntityFeature {
        self.attribute_f64(climate::ATTR_SUPPORTED_FEATURES)
            .map(|bits| ClimateEntityFeature::from_bits(bits as u32))
            .unwrap_or_default()
    }

    pub fn min_temp(&self) -> Option<f64> {
        self.attribute_f64(climate::ATTR_MIN_TEMP)
    }

    pub fn max_temp(&self) -> Option<f64> {
        self.attribute_f64(climate::ATTR_MAX_TEMP)
    }

    /// Temperature reading carried by this state
    ///
    /// Climate entities expose it in `current_temperature`, plain sensors as
    /// their state value. Non-numeric values (`unavailable`, `unknown`) yield
    /// `None`.
    pub fn temperature_reading(&self) -> Option<f64> {
        if self.entity_id.is_climate() {
            self.attribute_f64(climate::ATTR_CURRENT_TEMPERATURE)
        } else {
            self.state.trim().parse().ok()
        }
    }

    /// Compute the difference from a previous state, for logging
    pub fn diff(&self, old: Option<&State>) -> StateDiff {
        let Some(old) = old else {
            let mut attributes: Vec<_> = self
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), None, Some(v.clone())))
                .collect();
            attributes.sort_by(|a, b| a.0.cmp(&b.0));
            return StateDiff {
                state: Some((None, self.state.clone())),
                attributes,
            };
        };

        let state = (old.state != self.state).then(|| (Some(old.state.clone()), self.state.clone()));

        let mut attributes: Vec<_> = self
            .attributes
            .iter()
            .filter(|(k, v)| old.attributes.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), old.attributes.get(k).cloned(), Some(v.clone())))
            .chain(
                old.attributes
                    .iter()
                    .filter(|(k, _)| !self.attributes.contains_key(*k))
                    .map(|(k, v)| (k.clone(), Some(v.clone()), None)),
            )
            .collect();
        attributes.sort_by(|a, b| a.0.cmp(&b.0));

        StateDiff { state, attributes }
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        // Timestamps and context are not compared
        self.entity_id == other.entity_id
            && self.state == other.state
            && self.attributes == other.attributes
    }
}

type AttributeChange = (String, Option<serde_json::Value>, Option<serde_json::Value>);

/// Difference between two states of the same entity
#[derive(Debug, Clone, PartialEq)]
pub struct StateDiff {
    /// `(old, new)` state value, `None` when unchanged
    pub state: Option<(Option<String>, String)>,
    /// Changed attributes as `(key, old, new)`, sorted by key
    pub attributes: Vec<AttributeChange>,
}

impl StateDiff {
    pub fn is_empty(&self) -> bool {
        self.state.is_none() && self.attributes.is_empty()
    }
}

impl fmt::Display for StateDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some((old, new)) = &self.state {
            write!(f, "state {} -> {}", old.as_deref().unwrap_or("-"), new)?;
        }
        for (key, old, new) in &self.attributes {
            let show = |v: &Option<serde_json::Value>| {
                v.as_ref().map(|v| v.to_string()).unwrap_or_else(|| "-".into())
            };
            write!(f, "; {} {} -> {}", key, show(old), show(new))?;
        }
        Ok(())
    }
}
