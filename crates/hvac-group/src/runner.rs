//! Runtime wiring of a group to the state feed
//!
//! The runner feeds the group the states its sensor and actuators already
//! have, subscribes to their changes, starts the group, and forwards every
//! change until it is stopped.

use hvac_core::events::StateChangedData;
use hvac_core::Event;
use hvac_event_bus::SharedEventBus;
use hvac_state_store::SharedStateStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::HvacGroupResult;
use crate::group::SharedHvacGroup;

/// Drives one group from state-change events
pub struct GroupRunner {
    group: SharedHvacGroup,
    event_bus: SharedEventBus,
    state_store: SharedStateStore,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl GroupRunner {
    pub fn new(group: SharedHvacGroup, event_bus: SharedEventBus, state_store: SharedStateStore) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            group,
            event_bus,
            state_store,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    pub fn group(&self) -> &SharedHvacGroup {
        &self.group
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Attach to the state feed and start the group
    ///
    /// States already in the store count as first reports. Subscriptions are
    /// taken before those states are read, so no change is lost in between.
    pub async fn start(&self) -> HvacGroupResult<JoinHandle<()>> {
        let group = self.group.clone();
        info!(entity_id = %group.entity_id(), "Starting group runner");

        let mut actuator_rx = self.event_bus.track_state_changes(group.actuator_ids());
        let mut sensor_rx = self
            .event_bus
            .track_state_changes([group.temperature_entity_id().clone()]);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        for entity_id in group.actuator_ids() {
            if let Some(state) = self.state_store.get(&entity_id) {
                let context = state.context.clone();
                group
                    .handle_actuator_state(&entity_id, Some(&state), None, context)
                    .await?;
            }
        }
        if let Some(state) = self.state_store.get(group.temperature_entity_id()) {
            let context = state.context.clone();
            group.handle_sensor_state(Some(&state), None, context).await?;
        }

        group.start().await?;
        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = actuator_rx.recv() => match result {
                        Ok(event) => Self::forward_actuator(&group, event).await,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "Group runner lagged behind actuator changes");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("Event bus closed, stopping group runner");
                            break;
                        }
                    },
                    result = sensor_rx.recv() => match result {
                        Ok(event) => Self::forward_sensor(&group, event).await,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "Group runner lagged behind sensor changes");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("Event bus closed, stopping group runner");
                            break;
                        }
                    },
                    _ = shutdown_rx.recv() => {
                        debug!("Received shutdown signal");
                        break;
                    }
                }
            }

            group.stop();
            running.store(false, Ordering::SeqCst);
            info!(entity_id = %group.entity_id(), "Group runner stopped");
        });

        Ok(handle)
    }

    /// Stop forwarding changes and stop the group
    pub fn stop(&self) {
        if !self.is_running() {
            return;
        }
        info!(entity_id = %self.group.entity_id(), "Stopping group runner");
        let _ = self.shutdown_tx.send(());
    }

    async fn forward_actuator(group: &SharedHvacGroup, event: Event<StateChangedData>) {
        let data = event.data;
        if let Err(e) = group
            .handle_actuator_state(
                &data.entity_id,
                data.new_state.as_ref(),
                data.old_state.as_ref(),
                event.context,
            )
            .await
        {
            error!(entity_id = %data.entity_id, error = %e, "Failed to handle actuator state");
        }
    }

    async fn forward_sensor(group: &SharedHvacGroup, event: Event<StateChangedData>) {
        let data = event.data;
        if let Err(e) = group
            .handle_sensor_state(data.new_state.as_ref(), data.old_state.as_ref(), event.context)
            .await
        {
            error!(entity_id = %data.entity_id, error = %e, "Failed to handle sensor state");
        }
    }
}
