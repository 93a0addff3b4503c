//! Ordered collections of actuators with bulk operations

use hvac_core::{Context, EntityId, HvacMode};
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::actuator::Actuator;
use crate::command::Setpoint;
use crate::error::HvacGroupResult;
use crate::transaction::Transaction;

/// Actuators keyed by entity id, iterated in insertion order
#[derive(Debug, Clone, Default)]
pub struct ActuatorCollection {
    actuators: IndexMap<EntityId, Arc<Actuator>>,
}

impl ActuatorCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an actuator. Returns false, keeping the existing one, on a duplicate id.
    pub fn insert(&mut self, actuator: Arc<Actuator>) -> bool {
        if self.actuators.contains_key(actuator.entity_id()) {
            debug!(entity_id = %actuator.entity_id(), "Actuator already in collection");
            return false;
        }
        self.actuators
            .insert(actuator.entity_id().clone(), actuator);
        true
    }

    pub fn get(&self, entity_id: &EntityId) -> Option<&Arc<Actuator>> {
        self.actuators.get(entity_id)
    }

    pub fn contains(&self, entity_id: &EntityId) -> bool {
        self.actuators.contains_key(entity_id)
    }

    pub fn len(&self) -> usize {
        self.actuators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actuators.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Actuator>> {
        self.actuators.values()
    }

    pub fn entity_ids(&self) -> impl Iterator<Item = &EntityId> {
        self.actuators.keys()
    }

    /// Members whose id is not in `other`
    pub fn excluding(&self, other: &ActuatorCollection) -> ActuatorCollection {
        self.filtered(|id| !other.contains(id))
    }

    /// Members whose id is also in `other`, as this collection's instances
    pub fn shared_with(&self, other: &ActuatorCollection) -> ActuatorCollection {
        self.filtered(|id| other.contains(id))
    }

    fn filtered(&self, keep: impl Fn(&EntityId) -> bool) -> ActuatorCollection {
        ActuatorCollection {
            actuators: self
                .actuators
                .iter()
                .filter(|(id, _)| keep(id))
                .map(|(id, a)| (id.clone(), a.clone()))
                .collect(),
        }
    }

    /// Whether every member reported at least once; true when empty
    pub fn loaded(&self) -> bool {
        self.actuators.values().all(|a| a.is_loaded())
    }

    pub fn mark_initialized(&self) {
        for actuator in self.actuators.values() {
            actuator.mark_initialized();
        }
    }

    async fn set_context(&self, context: Option<&Context>) {
        for actuator in self.actuators.values() {
            actuator.set_context(context.cloned()).await;
        }
    }

    pub async fn turn_on(&self, setpoint: Setpoint, context: Option<&Context>) -> HvacGroupResult<()> {
        self.set_context(context).await;
        for actuator in self.actuators.values() {
            actuator.turn_on(setpoint).await?;
        }
        Ok(())
    }

    pub async fn turn_off(&self, setpoint: Setpoint, context: Option<&Context>) -> HvacGroupResult<()> {
        self.set_context(context).await;
        for actuator in self.actuators.values() {
            actuator.turn_off(setpoint).await?;
        }
        Ok(())
    }

    pub async fn set_mode(&self, mode: HvacMode, context: Option<&Context>) {
        self.set_context(context).await;
        for actuator in self.actuators.values() {
            actuator.stage_set_mode(mode).await;
        }
    }

    pub async fn set_temperature(
        &self,
        setpoint: Setpoint,
        mode: Option<HvacMode>,
        context: Option<&Context>,
    ) -> HvacGroupResult<()> {
        self.set_context(context).await;
        for actuator in self.actuators.values() {
            actuator.stage_set_temperature(setpoint, mode).await?;
        }
        Ok(())
    }

    /// Commit every member directly
    ///
    /// Members are independent: a failed command is logged and the remaining
    /// members still commit. Returns the number of failed commits.
    pub async fn commit(&self) -> usize {
        let mut failed = 0;
        for actuator in self.actuators.values() {
            if let Err(e) = actuator.commit().await {
                warn!(entity_id = %actuator.entity_id(), error = %e, "Actuator commit failed");
                failed += 1;
            }
        }
        failed
    }

    /// Move every staged command into a transaction
    pub async fn commit_into(&self, transaction: &mut Transaction) -> HvacGroupResult<()> {
        for actuator in self.actuators.values() {
            actuator.commit_into(transaction).await?;
        }
        Ok(())
    }
}

impl FromIterator<Arc<Actuator>> for ActuatorCollection {
    fn from_iter<I: IntoIterator<Item = Arc<Actuator>>>(iter: I) -> Self {
        let mut collection = Self::new();
        for actuator in iter {
            collection.insert(actuator);
        }
        collection
    }
}
