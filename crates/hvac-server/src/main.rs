//! HVAC Group Server
//!
//! Loads the `hvac_group:` list from a YAML file, runs every group against
//! an in-process state feed with simulated climate devices, and saves the
//! groups' state for the next start on shutdown.

mod demo_climate;

use anyhow::{Context as _, Result};
use hvac_config::HvacGroupConfig;
use hvac_event_bus::EventBus;
use hvac_group::{GroupRunner, HvacGroup, SharedHvacGroup};
use hvac_restore::{JsonRestoreStore, RestoreStateStore, SharedRestoreStore};
use hvac_service_registry::ServiceRegistry;
use hvac_state_store::StateStore;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const DEFAULT_CONFIG_FILE: &str = "configuration.yaml";

/// The central server instance
pub struct HvacServer {
    /// Event bus carrying state changes
    pub bus: Arc<EventBus>,
    /// Current state of every entity
    pub states: Arc<StateStore>,
    /// Routes commands to devices
    pub services: Arc<ServiceRegistry>,
    /// Group state persisted across restarts
    pub restore: SharedRestoreStore,
    runners: Vec<(GroupRunner, JoinHandle<()>)>,
}

impl HvacServer {
    /// Create a server whose storage lives under `config_dir`
    pub async fn new(config_dir: &Path) -> Result<Self> {
        let bus = Arc::new(EventBus::new());
        let states = Arc::new(StateStore::new(bus.clone()));
        let services = Arc::new(ServiceRegistry::new());
        let restore = JsonRestoreStore::load(config_dir)
            .await
            .context("Failed to load restore state")?;

        Ok(Self {
            bus,
            states,
            services,
            restore: Arc::new(restore),
            runners: Vec::new(),
        })
    }

    /// Build the configured groups and the devices they drive, then start them
    pub async fn start_groups(&mut self, configs: &[HvacGroupConfig]) -> Result<usize> {
        let mut groups: Vec<SharedHvacGroup> = Vec::with_capacity(configs.len());
        for config in configs {
            let group = HvacGroup::from_config(config, self.services.clone())?
                .with_restore_store(self.restore.clone())
                .with_state_store(self.states.clone());
            groups.push(Arc::new(group));
        }

        let index = groups
            .iter()
            .map(|group| (group.entity_id().clone(), group.clone()))
            .collect::<HashMap<_, _>>();
        demo_climate::seed_devices(configs, &self.states);
        demo_climate::register_climate_services(&self.services, self.states.clone(), Arc::new(index));

        for group in groups {
            let runner = GroupRunner::new(group.clone(), self.bus.clone(), self.states.clone());
            let handle = runner
                .start()
                .await
                .with_context(|| format!("Failed to start {}", group.entity_id()))?;
            info!("Started group {} ({})", group.name(), group.entity_id());
            self.runners.push((runner, handle));
        }

        Ok(self.runners.len())
    }

    /// Stop every group and persist its exposed state
    pub async fn shutdown(self) -> Result<()> {
        let mut snapshots = Vec::with_capacity(self.runners.len());

        for (runner, handle) in self.runners {
            runner.stop();
            if let Err(e) = handle.await {
                error!("Group runner for {} panicked: {}", runner.group().entity_id(), e);
            }
            snapshots.push(runner.group().to_state().await);
        }

        info!("Saving state of {} groups", snapshots.len());
        self.restore
            .save_states(snapshots)
            .await
            .context("Failed to save restore state")?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing, RUST_LOG overrides the default level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let config_dir = match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };

    info!("Starting HVAC group server");

    let configs = hvac_config::load_file(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let mut server = HvacServer::new(&config_dir).await?;
    let count = server.start_groups(&configs).await?;

    info!("HVAC group server is running with {} groups", count);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    server.shutdown().await
}
