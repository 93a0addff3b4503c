//! The HVAC group control engine
//!
//! A group drives its heaters and coolers as one thermostat. Inputs (a new
//! sensor reading, an actuator report, a mode or target request) update the
//! group's state and trigger a control pass; the pass stages commands on the
//! actuators and the group then commits them as one transaction.
//!
//! Three locks serialize the work:
//!
//! - the control lock, held for a whole pass, so two passes never interleave
//! - the mass-refresh lock, held while a forced pass re-asserts every
//!   actuator; an incremental pass that finds it taken is skipped, not queued
//! - the commit lock, so at most one command per actuator is in flight

use hvac_config::{ConfigResult, HvacGroupConfig};
use hvac_core::{climate, Context, EntityId, HvacMode, State};
use hvac_restore::SharedRestoreStore;
use hvac_service_registry::RemoteCommand;
use hvac_state_store::SharedStateStore;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::actuator::{Actuator, ActuatorRole};
use crate::attributes::ExposedState;
use crate::collection::ActuatorCollection;
use crate::command::Setpoint;
use crate::error::HvacGroupResult;
use crate::limits::{convert_to_range, Capabilities};
use crate::transaction::{Transaction, TransactionAction};

/// Payload of a `set_temperature` request addressed to the group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetTemperatureRequest {
    #[serde(default)]
    pub temperature: Option<f64>,

    #[serde(default)]
    pub target_temp_low: Option<f64>,

    #[serde(default)]
    pub target_temp_high: Option<f64>,

    #[serde(default)]
    pub hvac_mode: Option<HvacMode>,
}

impl SetTemperatureRequest {
    pub fn single(temperature: f64) -> Self {
        Self {
            temperature: Some(temperature),
            ..Default::default()
        }
    }

    pub fn range(low: f64, high: f64) -> Self {
        Self {
            target_temp_low: Some(low),
            target_temp_high: Some(high),
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: HvacMode) -> Self {
        self.hvac_mode = Some(mode);
        self
    }

    fn setpoint(&self) -> Setpoint {
        Setpoint {
            temperature: self.temperature,
            target_temp_low: self.target_temp_low,
            target_temp_high: self.target_temp_high,
        }
    }
}

/// Mutable state of a group
#[derive(Debug)]
struct GroupState {
    current_temperature: Option<f64>,
    /// Stored targets; only the form matching the group's features is used
    targets: Setpoint,
    hvac_mode: Option<HvacMode>,
    capabilities: Capabilities,
    is_heating: bool,
    is_cooling: bool,
    heaters_active: bool,
    coolers_active: bool,
    active: bool,
    require_mass_refresh: bool,
    state_restored: bool,
    context: Option<Context>,
}

impl GroupState {
    /// Targets in the form actuators receive
    fn setpoint(&self) -> Setpoint {
        if self.capabilities.is_ranged() {
            Setpoint {
                temperature: None,
                ..self.targets
            }
        } else {
            Setpoint {
                temperature: self.targets.temperature,
                ..Default::default()
            }
        }
    }

    fn apply_report(
        &mut self,
        entity_id: &EntityId,
        role: ActuatorRole,
        new_state: &State,
        old_state: Option<&State>,
        first_report: bool,
    ) {
        let bounds_changed = match old_state {
            Some(old) if !first_report => {
                old.min_temp() != new_state.min_temp() || old.max_temp() != new_state.max_temp()
            }
            _ => true,
        };

        if bounds_changed {
            self.capabilities
                .negotiate_bounds(new_state.min_temp(), new_state.max_temp());
            self.capabilities.clamp_setpoint(&mut self.targets);
            debug!(
                entity_id = %entity_id,
                min_temp = self.capabilities.min_temp,
                max_temp = self.capabilities.max_temp,
                "Bounds received from actuator"
            );
        }

        if first_report
            && self
                .capabilities
                .register_role(role, new_state.supported_features())
        {
            convert_to_range(&mut self.targets);
        }
    }
}

/// Everything a control pass reads and writes
#[derive(Debug)]
struct Pass {
    mode: HvacMode,
    current_temperature: f64,
    setpoint: Setpoint,
    context: Option<Context>,
    update_actuators: bool,
    force: bool,
    is_heating: bool,
    is_cooling: bool,
    heaters_active: bool,
    coolers_active: bool,
}

/// A set of heaters and coolers controlled as one thermostat
pub struct HvacGroup {
    entity_id: EntityId,
    name: String,
    temperature_entity_id: EntityId,
    heaters: ActuatorCollection,
    coolers: ActuatorCollection,
    toggle_heaters: bool,
    toggle_coolers: bool,
    precision: f64,
    target_temperature_step: Option<f64>,
    temperature_unit: String,
    state: Mutex<GroupState>,
    control_lock: Mutex<()>,
    mass_refresh_lock: Mutex<()>,
    commit_lock: Mutex<()>,
    running: AtomicBool,
    commander: Arc<dyn RemoteCommand>,
    restore_store: Option<SharedRestoreStore>,
    state_store: Option<SharedStateStore>,
}

impl HvacGroup {
    /// Build a group publishing under `entity_id`
    ///
    /// A device listed as both heater and cooler gets one actuator per role.
    pub fn new(
        entity_id: EntityId,
        config: &HvacGroupConfig,
        commander: Arc<dyn RemoteCommand>,
    ) -> Self {
        let heaters = config
            .heaters
            .iter()
            .map(|id| Arc::new(Actuator::heater(id.clone(), commander.clone())))
            .collect();
        let coolers = config
            .coolers
            .iter()
            .map(|id| Arc::new(Actuator::cooler(id.clone(), commander.clone())))
            .collect();

        Self {
            entity_id,
            name: config.name.clone(),
            temperature_entity_id: config.temperature_entity_id.clone(),
            heaters,
            coolers,
            toggle_heaters: config.toggle_heaters,
            toggle_coolers: config.toggle_coolers,
            precision: config.precision,
            target_temperature_step: config.target_temperature_step,
            temperature_unit: config.temperature_unit.clone(),
            state: Mutex::new(GroupState {
                current_temperature: None,
                targets: Setpoint::default(),
                hvac_mode: None,
                capabilities: Capabilities::new(config.min_temp, config.max_temp),
                is_heating: false,
                is_cooling: false,
                heaters_active: false,
                coolers_active: false,
                active: false,
                require_mass_refresh: false,
                state_restored: false,
                context: None,
            }),
            control_lock: Mutex::new(()),
            mass_refresh_lock: Mutex::new(()),
            commit_lock: Mutex::new(()),
            running: AtomicBool::new(false),
            commander,
            restore_store: None,
            state_store: None,
        }
    }

    /// Build a group under the entity id derived from its configuration
    pub fn from_config(
        config: &HvacGroupConfig,
        commander: Arc<dyn RemoteCommand>,
    ) -> ConfigResult<Self> {
        Ok(Self::new(config.entity_id()?, config, commander))
    }

    /// Source of the state to restore once all actuators have loaded
    pub fn with_restore_store(mut self, store: SharedRestoreStore) -> Self {
        self.restore_store = Some(store);
        self
    }

    /// Store the exposed state is published to after every committed pass
    pub fn with_state_store(mut self, store: SharedStateStore) -> Self {
        self.state_store = Some(store);
        self
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn temperature_entity_id(&self) -> &EntityId {
        &self.temperature_entity_id
    }

    pub fn heaters(&self) -> &ActuatorCollection {
        &self.heaters
    }

    pub fn coolers(&self) -> &ActuatorCollection {
        &self.coolers
    }

    /// Every actuator entity, heaters first, each id once
    pub fn actuator_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.heaters.entity_ids().cloned().collect();
        ids.extend(
            self.coolers
                .entity_ids()
                .filter(|id| !self.heaters.contains(id))
                .cloned(),
        );
        ids
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether the group has had enough information to issue commands
    pub async fn is_active(&self) -> bool {
        self.state.lock().await.active
    }

    /// Start controlling actuators with a full refresh
    pub async fn start(&self) -> HvacGroupResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!(entity_id = %self.entity_id, "HVAC group already started");
            return Ok(());
        }

        info!(entity_id = %self.entity_id, "Starting HVAC group");
        self.state.lock().await.require_mass_refresh = true;
        self.update(true).await
    }

    /// Stop reacting to inputs; state keeps being tracked
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!(entity_id = %self.entity_id, "Stopped HVAC group");
        }
    }

    /// Change the operating mode and re-assert every actuator
    pub async fn set_hvac_mode(&self, mode: HvacMode, context: Option<Context>) -> HvacGroupResult<()> {
        {
            let mut state = self.state.lock().await;
            if !state.capabilities.supports_mode(mode) {
                warn!(entity_id = %self.entity_id, mode = %mode, "Unsupported hvac mode");
                return Ok(());
            }
            if context.is_some() {
                state.context = context;
            }

            debug!(entity_id = %self.entity_id, mode = %mode, "Setting mode");
            state.hvac_mode = Some(mode);
            state.require_mass_refresh = true;
        }

        self.update(true).await
    }

    /// Change the target temperature(s) and re-assert every actuator
    ///
    /// Supplying both a scalar temperature and a range bound fails before
    /// anything changes. Values are clamped into the group's bounds; a
    /// scalar on a ranged group, or a range on a single-target group, is
    /// ignored with a warning.
    pub async fn set_temperature(
        &self,
        request: SetTemperatureRequest,
        context: Option<Context>,
    ) -> HvacGroupResult<()> {
        request.setpoint().check()?;

        {
            let mut state = self.state.lock().await;
            if context.is_some() {
                state.context = context;
            }
            let ranged = state.capabilities.is_ranged();

            if let Some(temperature) = request.temperature {
                if ranged {
                    warn!(entity_id = %self.entity_id, temperature, "Ignoring single target on a ranged group");
                } else {
                    state.targets.temperature = Some(state.capabilities.clamp(temperature));
                }
            }

            if request.target_temp_low.is_some() || request.target_temp_high.is_some() {
                if !ranged {
                    warn!(entity_id = %self.entity_id, "Ignoring target range on a single-target group");
                } else {
                    let caps = &state.capabilities;
                    let low = request
                        .target_temp_low
                        .map(|t| caps.clamp(t))
                        .or(state.targets.target_temp_low);
                    let high = request
                        .target_temp_high
                        .map(|t| caps.clamp(t))
                        .or(state.targets.target_temp_high);

                    match (low, high) {
                        (Some(low), Some(high)) if low > high => {
                            warn!(entity_id = %self.entity_id, low, high, "Ignoring inverted target range");
                        }
                        _ => {
                            state.targets.target_temp_low = low;
                            state.targets.target_temp_high = high;
                        }
                    }
                }
            }

            if let Some(mode) = request.hvac_mode {
                if state.capabilities.supports_mode(mode) {
                    state.hvac_mode = Some(mode);
                } else {
                    warn!(entity_id = %self.entity_id, mode = %mode, "Unsupported hvac mode");
                }
            }

            debug!(entity_id = %self.entity_id, setpoint = %state.setpoint(), "Setting temperature");
            state.require_mass_refresh = true;
        }

        self.update(true).await
    }

    /// React to a new reading of the temperature sensor
    pub async fn handle_sensor_state(
        &self,
        new_state: Option<&State>,
        old_state: Option<&State>,
        context: Context,
    ) -> HvacGroupResult<()> {
        let Some(new_state) = new_state else {
            return Ok(());
        };

        let reading = {
            let mut state = self.state.lock().await;
            state.context = Some(context);

            let Some(reading) = new_state.temperature_reading() else {
                warn!(
                    entity_id = %new_state.entity_id,
                    state = %new_state.state,
                    "Ignoring non-numeric temperature"
                );
                return Ok(());
            };
            if old_state.and_then(State::temperature_reading) == Some(reading) {
                return Ok(());
            }

            state.current_temperature = Some(reading);
            reading
        };

        debug!(
            entity_id = %self.entity_id,
            sensor = %new_state.entity_id,
            temperature = reading,
            "New temperature received"
        );
        self.update(false).await
    }

    /// React to a state report of one of the actuators
    ///
    /// Reports feed the bounds and mode negotiation. A report from an
    /// actuator no forced pass has addressed yet schedules one. Once every
    /// actuator has reported, the persisted state is restored.
    pub async fn handle_actuator_state(
        &self,
        entity_id: &EntityId,
        new_state: Option<&State>,
        old_state: Option<&State>,
        context: Context,
    ) -> HvacGroupResult<()> {
        let Some(new_state) = new_state else {
            return Ok(());
        };

        debug!(
            entity_id = %entity_id,
            diff = %new_state.diff(old_state),
            context = %context.id,
            "Actuator changed state"
        );

        let roles = [
            (ActuatorRole::Heater, self.heaters.get(entity_id)),
            (ActuatorRole::Cooler, self.coolers.get(entity_id)),
        ];
        if roles.iter().all(|(_, actuator)| actuator.is_none()) {
            return Ok(());
        }

        {
            let mut state = self.state.lock().await;
            state.context = Some(context);

            for (role, actuator) in roles {
                let Some(actuator) = actuator else { continue };

                actuator.record_state(new_state.clone()).await;
                let first_report = old_state.is_none() || !actuator.is_loaded();
                state.apply_report(entity_id, role, new_state, old_state, first_report);

                if !actuator.is_initialized() {
                    state.require_mass_refresh = true;
                }
                actuator.mark_loaded();
            }
        }

        self.update(false).await?;
        self.apply_last_state_when_loaded().await
    }

    /// Restore persisted targets and mode, once, after every actuator loaded
    async fn apply_last_state_when_loaded(&self) -> HvacGroupResult<()> {
        if !self.heaters.loaded() || !self.coolers.loaded() {
            return Ok(());
        }

        let (ranged, min_temp, max_temp, targets, mode) = {
            let mut state = self.state.lock().await;
            if state.state_restored {
                return Ok(());
            }
            state.state_restored = true;
            (
                state.capabilities.is_ranged(),
                state.capabilities.min_temp,
                state.capabilities.max_temp,
                state.targets,
                state.hvac_mode,
            )
        };
        let default_temperature = if self.coolers.is_empty() {
            min_temp
        } else {
            max_temp
        };

        let last_state = match &self.restore_store {
            Some(store) => store.last_state(&self.entity_id).await,
            None => None,
        };

        match last_state {
            Some(last_state) => {
                let request = if ranged {
                    SetTemperatureRequest::range(
                        targets
                            .target_temp_low
                            .or_else(|| last_state.attribute_f64(climate::ATTR_TARGET_TEMP_LOW))
                            .unwrap_or(min_temp),
                        targets
                            .target_temp_high
                            .or_else(|| last_state.attribute_f64(climate::ATTR_TARGET_TEMP_HIGH))
                            .unwrap_or(max_temp),
                    )
                } else {
                    SetTemperatureRequest::single(
                        targets
                            .temperature
                            .or_else(|| last_state.attribute_f64(climate::ATTR_TEMPERATURE))
                            .unwrap_or(default_temperature),
                    )
                };
                info!(entity_id = %self.entity_id, "Restoring previous state");
                self.set_temperature(request, None).await?;

                if mode.is_none() {
                    match last_state.state.parse::<HvacMode>() {
                        Ok(mode) => self.set_hvac_mode(mode, None).await?,
                        Err(e) => debug!(entity_id = %self.entity_id, error = %e, "Not restoring mode"),
                    }
                }
            }
            None => {
                let mut state = self.state.lock().await;
                if ranged {
                    state.targets.target_temp_low.get_or_insert(min_temp);
                    state.targets.target_temp_high.get_or_insert(max_temp);
                } else {
                    state.targets.temperature.get_or_insert(default_temperature);
                }
                warn!(
                    entity_id = %self.entity_id,
                    setpoint = %state.setpoint(),
                    "No previously saved temperature, using defaults"
                );
            }
        }

        let mut state = self.state.lock().await;
        if state.hvac_mode.is_none() {
            state.hvac_mode = Some(HvacMode::Off);
        }
        Ok(())
    }

    /// Run a control pass, commit what it staged, and publish the result
    ///
    /// Does nothing before the group is started, or while a forced refresh
    /// owns the actuators. That refresh commits what is staged.
    pub async fn update(&self, update_actuators: bool) -> HvacGroupResult<()> {
        if !self.is_running() {
            return Ok(());
        }

        if !self.run_pass(update_actuators).await? {
            return Ok(());
        }
        self.commit().await?;
        self.publish().await;
        Ok(())
    }

    /// Returns false when the pass was skipped for a running forced refresh
    #[instrument(skip(self), fields(entity_id = %self.entity_id))]
    async fn run_pass(&self, update_actuators: bool) -> HvacGroupResult<bool> {
        if self.mass_refresh_lock.try_lock().is_err() {
            debug!("Actuators are being mass controlled, skipping pass");
            return Ok(false);
        }

        let _pass = self.control_lock.lock().await;

        let mut pass = {
            let mut state = self.state.lock().await;
            let setpoint = state.setpoint();

            let (Some(mode), Some(current_temperature)) = (state.hvac_mode, state.current_temperature)
            else {
                return Ok(true);
            };
            if !setpoint.is_known() {
                return Ok(true);
            }
            if !state.active {
                state.active = true;
                info!(
                    current_temperature,
                    setpoint = %setpoint,
                    mode = %mode,
                    "Obtained current and target temperatures"
                );
            }

            Pass {
                mode,
                current_temperature,
                setpoint,
                context: state.context.clone(),
                update_actuators,
                force: std::mem::take(&mut state.require_mass_refresh),
                is_heating: state.is_heating,
                is_cooling: state.is_cooling,
                heaters_active: state.heaters_active,
                coolers_active: state.coolers_active,
            }
        };

        self.control_actuators(&mut pass).await?;

        let mut state = self.state.lock().await;
        state.is_heating = pass.is_heating;
        state.is_cooling = pass.is_cooling;
        state.heaters_active = pass.heaters_active;
        state.coolers_active = pass.coolers_active;
        Ok(true)
    }

    async fn control_actuators(&self, pass: &mut Pass) -> HvacGroupResult<()> {
        // Released on every exit path
        let _mass_refresh = if pass.force {
            Some(self.mass_refresh_lock.lock().await)
        } else {
            None
        };

        if pass.force {
            debug!(mode = %pass.mode, "Force updating actuators");
            match pass.mode {
                HvacMode::Heat => {
                    self.switch(pass, ActuatorRole::Cooler, false, true).await?;
                    self.switch(pass, ActuatorRole::Heater, true, false).await?;
                }
                HvacMode::Cool => {
                    self.switch(pass, ActuatorRole::Heater, false, true).await?;
                    self.switch(pass, ActuatorRole::Cooler, true, false).await?;
                }
                HvacMode::HeatCool => {
                    self.switch(pass, ActuatorRole::Heater, true, true).await?;
                    self.switch(pass, ActuatorRole::Cooler, true, true).await?;
                }
                HvacMode::Off => {
                    self.switch(pass, ActuatorRole::Cooler, false, false).await?;
                    // Common actuators were just turned off as coolers
                    self.switch(pass, ActuatorRole::Heater, false, true).await?;
                }
            }

            self.heaters.mark_initialized();
            self.coolers.mark_initialized();
            debug!("Actuators initialized");
        }

        let (Some(low), Some(high)) = (
            pass.setpoint.low_or_temperature(),
            pass.setpoint.high_or_temperature(),
        ) else {
            return Ok(());
        };
        let current = pass.current_temperature;

        let mut too_hot = current >= high && !self.coolers.is_empty();
        let mut too_cold = low >= current && !self.heaters.is_empty();
        if too_hot && too_cold {
            debug!(current, low, high, "Temperature sits on both thresholds, idling");
            too_hot = false;
            too_cold = false;
        }

        let update = pass.update_actuators;
        let mut needs_cooling = false;
        let mut needs_heating = false;

        if too_hot {
            needs_cooling = true;
            if (!pass.coolers_active || update) && self.toggle_coolers && pass.mode.allows_cooling() {
                debug!("Turning on cooling");
                self.switch(pass, ActuatorRole::Cooler, true, false).await?;
            }
        } else if (pass.coolers_active || update) && self.toggle_coolers {
            debug!("Turning off cooling");
            self.switch(pass, ActuatorRole::Cooler, false, true).await?;
        }

        if too_cold {
            needs_heating = true;
            if (!pass.heaters_active || update) && self.toggle_heaters && pass.mode.allows_heating() {
                debug!("Turning on heating");
                self.switch(pass, ActuatorRole::Heater, true, false).await?;
            }
        } else if (pass.heaters_active || update) && self.toggle_heaters {
            debug!("Turning off heating");
            self.switch(pass, ActuatorRole::Heater, false, true).await?;
        }

        let forced_heat_cool = pass.force && pass.mode == HvacMode::HeatCool;
        if needs_heating {
            if (!pass.is_heating && pass.mode.allows_heating()) || forced_heat_cool {
                self.assign_common(pass, ActuatorRole::Heater, ActuatorRole::Heater.mode())
                    .await?;
            }
        } else if needs_cooling {
            if (!pass.is_cooling && pass.mode.allows_cooling()) || forced_heat_cool {
                self.assign_common(pass, ActuatorRole::Cooler, ActuatorRole::Cooler.mode())
                    .await?;
            }
        } else if ((pass.is_heating || update) && self.toggle_heaters)
            || ((pass.is_cooling || update) && self.toggle_coolers)
        {
            self.assign_common(pass, ActuatorRole::Heater, HvacMode::Off)
                .await?;
        } else if forced_heat_cool {
            // With nothing needed, common actuators default to heating
            self.assign_common(pass, ActuatorRole::Heater, ActuatorRole::Heater.mode())
                .await?;
        }

        pass.is_heating = needs_heating;
        pass.is_cooling = needs_cooling;
        Ok(())
    }

    fn members(&self, role: ActuatorRole) -> &ActuatorCollection {
        match role {
            ActuatorRole::Heater => &self.heaters,
            ActuatorRole::Cooler => &self.coolers,
        }
    }

    /// Turn a role's actuators on or off; `pure` leaves out common actuators
    async fn switch(
        &self,
        pass: &mut Pass,
        role: ActuatorRole,
        on: bool,
        pure: bool,
    ) -> HvacGroupResult<()> {
        let members = self.members(role);
        if members.is_empty() {
            return Ok(());
        }

        match role {
            ActuatorRole::Heater => pass.heaters_active = on,
            ActuatorRole::Cooler => pass.coolers_active = on,
        }

        let targets = if pure {
            members.excluding(self.members(role.opposite()))
        } else {
            members.clone()
        };
        if on {
            targets.turn_on(pass.setpoint, pass.context.as_ref()).await
        } else {
            targets.turn_off(pass.setpoint, pass.context.as_ref()).await
        }
    }

    /// Stage common actuators through their instance in `role`
    async fn assign_common(&self, pass: &Pass, role: ActuatorRole, mode: HvacMode) -> HvacGroupResult<()> {
        let common = self.members(role).shared_with(self.members(role.opposite()));
        if common.is_empty() {
            return Ok(());
        }

        debug!(role = %role, mode = %mode, count = common.len(), "Setting common actuators");
        common
            .set_temperature(pass.setpoint, Some(mode), pass.context.as_ref())
            .await
    }

    /// Dispatch everything staged on heaters and coolers in one transaction
    ///
    /// Heaters are collected first, so for a common actuator staged in both
    /// roles the cooler instance's values win.
    async fn commit(&self) -> HvacGroupResult<Vec<TransactionAction>> {
        let _commit = self.commit_lock.lock().await;
        let context = self.state.lock().await.context.clone();

        let mut transaction = Transaction::new();
        transaction.begin(context)?;
        self.heaters.commit_into(&mut transaction).await?;
        self.coolers.commit_into(&mut transaction).await?;

        if transaction.is_empty() {
            transaction.cancel()?;
            return Ok(Vec::new());
        }

        let dispatched = transaction.commit(self.commander.as_ref()).await?;
        debug!(entity_id = %self.entity_id, count = dispatched.len(), "Committed actuator commands");
        Ok(dispatched)
    }

    /// Current exposed state
    pub async fn exposed_state(&self) -> ExposedState {
        let state = self.state.lock().await;
        let setpoint = state.setpoint();

        ExposedState {
            friendly_name: self.name.clone(),
            current_temperature: state.current_temperature,
            hvac_mode: state.hvac_mode,
            hvac_action: ExposedState::action(state.hvac_mode, state.is_heating, state.is_cooling),
            target_temperature: setpoint.temperature,
            target_temp_low: setpoint.target_temp_low,
            target_temp_high: setpoint.target_temp_high,
            min_temp: state.capabilities.min_temp,
            max_temp: state.capabilities.max_temp,
            hvac_modes: state.capabilities.hvac_modes.clone(),
            supported_features: state.capabilities.supported_features,
            precision: self.precision,
            target_temp_step: self.target_temperature_step.unwrap_or(self.precision),
            temperature_unit: self.temperature_unit.clone(),
        }
    }

    /// Exposed state as a `State` of the group entity
    pub async fn to_state(&self) -> State {
        let exposed = self.exposed_state().await;
        let context = self.state.lock().await.context.clone().unwrap_or_default();
        State::new(
            self.entity_id.clone(),
            exposed.state(),
            exposed.attributes(),
            context,
        )
    }

    async fn publish(&self) {
        let Some(store) = &self.state_store else {
            return;
        };

        let state = self.to_state().await;
        store.set(state.entity_id, state.state, state.attributes, state.context);
    }
}

impl std::fmt::Debug for HvacGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HvacGroup")
            .field("entity_id", &self.entity_id)
            .field("heaters", &self.heaters)
            .field("coolers", &self.coolers)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Thread-safe handle to a group
pub type SharedHvacGroup = Arc<HvacGroup>;

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hvac_core::ClimateEntityFeature;
    use hvac_service_registry::ServiceError;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Recorder {
        calls: StdMutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl RemoteCommand for Recorder {
        async fn call(
            &self,
            _domain: &str,
            _service: &str,
            data: Value,
            target: &EntityId,
            _context: Context,
        ) -> Result<(), ServiceError> {
            self.calls.lock().unwrap().push((target.to_string(), data));
            Ok(())
        }
    }

    fn id(s: &str) -> EntityId {
        s.parse().unwrap()
    }

    fn device(entity_id: &str, features: ClimateEntityFeature) -> State {
        State::new(
            id(entity_id),
            "off",
            HashMap::from([
                ("min_temp".to_string(), json!("17")),
                ("max_temp".to_string(), json!("32")),
                ("supported_features".to_string(), json!(features.bits())),
            ]),
            Context::new(),
        )
    }

    fn sensor(value: &str) -> State {
        State::new(id("sensor.temperature"), value, HashMap::new(), Context::new())
    }

    async fn group(recorder: Arc<Recorder>) -> HvacGroup {
        let mut config = HvacGroupConfig::new(id("sensor.temperature"));
        config.heaters = vec![id("climate.heater")];
        config.coolers = vec![id("climate.cooler")];
        let group = HvacGroup::new(id("climate.group"), &config, recorder);

        for entity_id in ["climate.heater", "climate.cooler"] {
            let state = device(entity_id, ClimateEntityFeature::TARGET_TEMPERATURE);
            group
                .handle_actuator_state(&id(entity_id), Some(&state), None, Context::new())
                .await
                .unwrap();
        }
        group
            .handle_sensor_state(Some(&sensor("22.5")), None, Context::new())
            .await
            .unwrap();
        group
    }

    #[tokio::test]
    async fn test_nothing_runs_before_start() {
        let recorder = Arc::new(Recorder::default());
        let group = group(recorder.clone()).await;

        group
            .set_temperature(SetTemperatureRequest::range(21.0, 23.0), None)
            .await
            .unwrap();
        assert!(recorder.calls.lock().unwrap().is_empty());
        assert!(!group.is_active().await);

        group.start().await.unwrap();
        assert!(group.is_active().await);
        assert!(!recorder.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restore_defaults_without_snapshot() {
        let group = group(Arc::new(Recorder::default())).await;
        let exposed = group.exposed_state().await;

        assert_eq!(exposed.hvac_mode, Some(HvacMode::Off));
        assert_eq!(exposed.hvac_modes, vec![HvacMode::Off, HvacMode::HeatCool]);
        assert_eq!((exposed.min_temp, exposed.max_temp), (17.0, 32.0));
        assert_eq!(exposed.target_temp_low, Some(17.0));
        assert_eq!(exposed.target_temp_high, Some(32.0));
        assert_eq!(exposed.target_temperature, None);
        assert_eq!(exposed.current_temperature, Some(22.5));
    }

    #[tokio::test]
    async fn test_incremental_pass_skipped_during_mass_refresh() {
        let recorder = Arc::new(Recorder::default());
        let group = group(recorder.clone()).await;
        group.start().await.unwrap();
        group
            .set_temperature(
                SetTemperatureRequest::range(21.0, 23.0).with_mode(HvacMode::HeatCool),
                None,
            )
            .await
            .unwrap();
        recorder.calls.lock().unwrap().clear();

        let mass_refresh = group.mass_refresh_lock.lock().await;
        group
            .handle_sensor_state(Some(&sensor("25")), Some(&sensor("22.5")), Context::new())
            .await
            .unwrap();
        assert!(recorder.calls.lock().unwrap().is_empty());
        assert!(!group.state.lock().await.is_cooling);
        drop(mass_refresh);

        group.update(false).await.unwrap();
        assert!(group.state.lock().await.is_cooling);
    }

    #[tokio::test]
    async fn test_update_during_mass_refresh_leaves_staged_commands() {
        let recorder = Arc::new(Recorder::default());
        let group = group(recorder.clone()).await;
        group.start().await.unwrap();
        group
            .set_temperature(
                SetTemperatureRequest::range(21.0, 23.0).with_mode(HvacMode::HeatCool),
                None,
            )
            .await
            .unwrap();
        recorder.calls.lock().unwrap().clear();

        let heater = group.heaters().get(&id("climate.heater")).unwrap().clone();
        heater.turn_off(Setpoint::single(21.0)).await.unwrap();

        let mass_refresh = group.mass_refresh_lock.lock().await;
        group.update(false).await.unwrap();
        assert!(recorder.calls.lock().unwrap().is_empty());
        assert!(heater.staged().await.is_some());
        drop(mass_refresh);

        group.update(false).await.unwrap();
        assert!(heater.staged().await.is_none());
        assert!(!recorder.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_mode_is_ignored() {
        let recorder = Arc::new(Recorder::default());
        let group = group(recorder.clone()).await;
        group.start().await.unwrap();
        recorder.calls.lock().unwrap().clear();

        group.set_hvac_mode(HvacMode::Heat, None).await.unwrap();

        assert_eq!(group.exposed_state().await.hvac_mode, Some(HvacMode::Off));
        assert!(recorder.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scalar_request_on_ranged_group_is_ignored() {
        let group = group(Arc::new(Recorder::default())).await;

        group
            .set_temperature(SetTemperatureRequest::single(20.0), None)
            .await
            .unwrap();
        group
            .set_temperature(SetTemperatureRequest::range(40.0, 10.0), None)
            .await
            .unwrap();

        let exposed = group.exposed_state().await;
        assert_eq!(exposed.target_temperature, None);
        assert_eq!(exposed.target_temp_low, Some(17.0));
        assert_eq!(exposed.target_temp_high, Some(32.0));

        group
            .set_temperature(SetTemperatureRequest::range(10.0, 40.0), None)
            .await
            .unwrap();
        let exposed = group.exposed_state().await;
        assert_eq!(exposed.target_temp_low, Some(17.0));
        assert_eq!(exposed.target_temp_high, Some(32.0));
    }

    #[tokio::test]
    async fn test_unknown_actuator_is_ignored() {
        let recorder = Arc::new(Recorder::default());
        let group = group(recorder.clone()).await;
        let before = group.exposed_state().await;

        let stranger = device("climate.stranger", ClimateEntityFeature::TARGET_TEMPERATURE);
        group
            .handle_actuator_state(&id("climate.stranger"), Some(&stranger), None, Context::new())
            .await
            .unwrap();

        assert_eq!(group.exposed_state().await, before);
    }
}
