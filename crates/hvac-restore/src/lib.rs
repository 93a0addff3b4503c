//! Restore state for HVAC groups
//!
//! A group persists nothing on its own. On shutdown the host saves the last
//! exposed state of every group here; on the next start each group asks for
//! its snapshot exactly once, after all of its actuators have reported.

mod storage;

pub use storage::{Storage, StorageError, StorageFile, StorageResult};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hvac_core::{EntityId, State};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Storage key of the restore file
pub const STORAGE_KEY: &str = "hvac_group.restore_state";
/// Current storage major version
pub const STORAGE_VERSION: u32 = 1;
/// Current storage minor version
pub const STORAGE_MINOR_VERSION: u32 = 1;

/// Source of previously persisted group states
#[async_trait]
pub trait RestoreStateStore: Send + Sync {
    /// Last persisted state of an entity, if any
    async fn last_state(&self, entity_id: &EntityId) -> Option<State>;

    /// Record states to be returned by later lookups
    async fn save_states(&self, states: Vec<State>) -> StorageResult<()>;
}

/// One persisted state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredState {
    pub state: State,
    pub last_seen: DateTime<Utc>,
}

/// Restore store backed by `.storage/hvac_group.restore_state`
///
/// The file is read once at load time; saving merges the given states into
/// the in-memory table and rewrites the whole file.
pub struct JsonRestoreStore {
    storage: Storage,
    states: DashMap<EntityId, StoredState>,
}

impl JsonRestoreStore {
    /// Load the restore file from a config directory
    pub async fn load(config_dir: impl AsRef<Path>) -> StorageResult<Self> {
        let storage = Storage::new(config_dir);
        let states = DashMap::new();

        if let Some(file) = storage
            .load::<Vec<StoredState>>(STORAGE_KEY, STORAGE_VERSION)
            .await?
        {
            for stored in file.data {
                states.insert(stored.state.entity_id.clone(), stored);
            }
        }

        info!(count = states.len(), "Loaded restore states");
        Ok(Self { storage, states })
    }

    fn snapshot(&self) -> Vec<StoredState> {
        let mut states: Vec<StoredState> = self.states.iter().map(|r| r.value().clone()).collect();
        states.sort_by(|a, b| a.state.entity_id.cmp(&b.state.entity_id));
        states
    }
}

#[async_trait]
impl RestoreStateStore for JsonRestoreStore {
    async fn last_state(&self, entity_id: &EntityId) -> Option<State> {
        self.states.get(entity_id).map(|s| s.state.clone())
    }

    async fn save_states(&self, states: Vec<State>) -> StorageResult<()> {
        let now = Utc::now();
        for state in states {
            debug!(entity_id = %state.entity_id, state = %state.state, "Persisting state");
            self.states.insert(
                state.entity_id.clone(),
                StoredState {
                    state,
                    last_seen: now,
                },
            );
        }

        let file = StorageFile::new(
            STORAGE_KEY,
            self.snapshot(),
            STORAGE_VERSION,
            STORAGE_MINOR_VERSION,
        );
        self.storage.save(&file).await
    }
}

/// Restore store that only lives in memory
#[derive(Default)]
pub struct MemoryRestoreStore {
    states: DashMap<EntityId, State>,
}

impl MemoryRestoreStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with the given states
    pub fn with_states(states: impl IntoIterator<Item = State>) -> Self {
        let store = Self::new();
        for state in states {
            store.states.insert(state.entity_id.clone(), state);
        }
        store
    }
}

#[async_trait]
impl RestoreStateStore for MemoryRestoreStore {
    async fn last_state(&self, entity_id: &EntityId) -> Option<State> {
        self.states.get(entity_id).map(|s| s.clone())
    }

    async fn save_states(&self, states: Vec<State>) -> StorageResult<()> {
        for state in states {
            self.states.insert(state.entity_id.clone(), state);
        }
        Ok(())
    }
}

/// Thread-safe handle to a restore store
pub type SharedRestoreStore = Arc<dyn RestoreStateStore>;
