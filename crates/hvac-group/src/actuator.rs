//! A single heating or cooling device controlled by a group
//!
//! An actuator never sends a command right away. Operations compute a
//! command from the device's last reported capabilities and stage it in a
//! single slot; staging again replaces whatever was there. `commit` sends the
//! staged command and empties the slot.

use hvac_core::{climate, Context, EntityId, HvacMode, State};
use hvac_service_registry::RemoteCommand;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, instrument, warn};

use crate::command::{ClimateCommand, ClimateService, Setpoint, StagedCommand};
use crate::error::HvacGroupResult;
use crate::transaction::Transaction;

/// Role of an actuator inside a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorRole {
    Heater,
    Cooler,
}

impl ActuatorRole {
    /// Mode a device is switched to when this role turns it on
    pub fn mode(&self) -> HvacMode {
        match self {
            ActuatorRole::Heater => HvacMode::Heat,
            ActuatorRole::Cooler => HvacMode::Cool,
        }
    }

    pub fn opposite(&self) -> ActuatorRole {
        match self {
            ActuatorRole::Heater => ActuatorRole::Cooler,
            ActuatorRole::Cooler => ActuatorRole::Heater,
        }
    }
}

impl fmt::Display for ActuatorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActuatorRole::Heater => f.write_str("heater"),
            ActuatorRole::Cooler => f.write_str("cooler"),
        }
    }
}

/// Slot guarded by the commit gate
#[derive(Default)]
struct CommitSlot {
    staged: Option<StagedCommand>,
    context: Option<Context>,
}

/// One device of a group, in one role
///
/// A device configured as both heater and cooler is represented by two
/// independent actuators, one per role.
pub struct Actuator {
    entity_id: EntityId,
    role: Option<ActuatorRole>,
    loaded: AtomicBool,
    initialized: AtomicBool,
    last_state: RwLock<Option<State>>,
    /// Commit gate: held while staging and for the whole remote call on commit
    slot: Mutex<CommitSlot>,
    commander: Arc<dyn RemoteCommand>,
}

impl Actuator {
    pub fn new(
        entity_id: EntityId,
        role: Option<ActuatorRole>,
        commander: Arc<dyn RemoteCommand>,
    ) -> Self {
        Self {
            entity_id,
            role,
            loaded: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            last_state: RwLock::new(None),
            slot: Mutex::new(CommitSlot::default()),
            commander,
        }
    }

    pub fn heater(entity_id: EntityId, commander: Arc<dyn RemoteCommand>) -> Self {
        Self::new(entity_id, Some(ActuatorRole::Heater), commander)
    }

    pub fn cooler(entity_id: EntityId, commander: Arc<dyn RemoteCommand>) -> Self {
        Self::new(entity_id, Some(ActuatorRole::Cooler), commander)
    }

    /// An actuator without a role; it can be set to a mode but not turned on
    pub fn generic(entity_id: EntityId, commander: Arc<dyn RemoteCommand>) -> Self {
        Self::new(entity_id, None, commander)
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn role(&self) -> Option<ActuatorRole> {
        self.role
    }

    /// Whether the device has reported a state at least once
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Record the first state report. Never reverts.
    pub fn mark_loaded(&self) {
        self.loaded.store(true, Ordering::Release);
    }

    /// Whether a mass refresh has already addressed this actuator
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    /// Last state reported by the device
    pub async fn state(&self) -> Option<State> {
        self.last_state.read().await.clone()
    }

    pub async fn record_state(&self, state: State) {
        *self.last_state.write().await = Some(state);
    }

    /// Context attached to commands staged from now on
    pub async fn set_context(&self, context: Option<Context>) {
        self.slot.lock().await.context = context;
    }

    /// Currently staged command, if any
    pub async fn staged(&self) -> Option<StagedCommand> {
        self.slot.lock().await.staged.clone()
    }

    async fn stage(&self, service: ClimateService, command: ClimateCommand) {
        let mut slot = self.slot.lock().await;
        if slot.staged.is_some() {
            debug!(entity_id = %self.entity_id, "Replacing staged command");
        }
        let context = slot.context.clone();
        slot.staged = Some(StagedCommand {
            service,
            command,
            context,
        });
        debug!(entity_id = %self.entity_id, service = %service, "Staged command");
    }

    /// Stage a mode change, replacing any staged command
    pub async fn stage_set_mode(&self, mode: HvacMode) {
        self.stage(ClimateService::SetHvacMode, ClimateCommand::mode(mode))
            .await;
    }

    /// Stage a temperature change, optionally with a mode change
    ///
    /// Range-capable devices receive a low/high pair, each bound falling back
    /// to the scalar temperature. Other devices receive one temperature picked
    /// by role: heaters fall back to the low bound, coolers to the high bound.
    /// Does nothing if the device never reported a state.
    pub async fn stage_set_temperature(
        &self,
        setpoint: Setpoint,
        mode: Option<HvacMode>,
    ) -> HvacGroupResult<()> {
        setpoint.check()?;

        let Some(state) = self.state().await else {
            warn!(
                entity_id = %self.entity_id,
                "Cannot set temperature of an actuator that never reported its state"
            );
            return Ok(());
        };

        let mut command = if state.supported_features().supports_range() {
            ClimateCommand {
                target_temp_low: setpoint.target_temp_low.or(setpoint.temperature),
                target_temp_high: setpoint.target_temp_high.or(setpoint.temperature),
                ..Default::default()
            }
        } else {
            ClimateCommand {
                temperature: self.single_target(&setpoint),
                ..Default::default()
            }
        };
        command.hvac_mode = mode;

        self.stage(ClimateService::SetTemperature, command).await;
        Ok(())
    }

    fn single_target(&self, setpoint: &Setpoint) -> Option<f64> {
        match self.role {
            Some(ActuatorRole::Heater) => setpoint.temperature.or(setpoint.target_temp_low),
            Some(ActuatorRole::Cooler) => setpoint.temperature.or(setpoint.target_temp_high),
            None => setpoint.temperature,
        }
    }

    /// Stage switching the device on in its role's mode
    pub async fn turn_on(&self, setpoint: Setpoint) -> HvacGroupResult<()> {
        match self.role {
            Some(role) => self.stage_set_temperature(setpoint, Some(role.mode())).await,
            None => {
                warn!(
                    entity_id = %self.entity_id,
                    "Generic actuator cannot be turned on, set a mode instead"
                );
                Ok(())
            }
        }
    }

    /// Stage switching the device off
    pub async fn turn_off(&self, setpoint: Setpoint) -> HvacGroupResult<()> {
        self.stage_set_temperature(setpoint, Some(HvacMode::Off))
            .await
    }

    /// Send the staged command and wait for the device to acknowledge it
    ///
    /// The slot is emptied before the call, so a failed command is not
    /// retried on the next commit.
    #[instrument(skip(self), fields(entity_id = %self.entity_id))]
    pub async fn commit(&self) -> HvacGroupResult<()> {
        let mut slot = self.slot.lock().await;
        let Some(staged) = slot.staged.take() else {
            debug!("No staged command");
            return Ok(());
        };

        self.commander
            .call(
                climate::DOMAIN,
                staged.service.as_str(),
                serde_json::Value::Object(staged.command.to_data()),
                &self.entity_id,
                staged.context.unwrap_or_default(),
            )
            .await?;
        debug!(service = %staged.service, "Committed command");
        Ok(())
    }

    /// Move the staged command into a group transaction
    pub async fn commit_into(&self, transaction: &mut Transaction) -> HvacGroupResult<()> {
        let mut slot = self.slot.lock().await;
        if let Some(staged) = slot.staged.take() {
            transaction.add(
                &self.entity_id,
                staged.service,
                staged.command.to_data(),
                staged.context,
            )?;
        }
        Ok(())
    }
}

impl fmt::Debug for Actuator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actuator")
            .field("entity_id", &self.entity_id)
            .field("role", &self.role)
            .field("loaded", &self.is_loaded())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
