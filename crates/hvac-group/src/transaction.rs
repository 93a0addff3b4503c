//! Transaction buffer for grouped device commands
//!
//! Commands are keyed by target and service. Adding the same pair twice
//! merges the payloads, later keys winning, so two partial commands for one
//! device end up as a single service call. A command may carry its own
//! causation context; otherwise it goes out under the transaction's.

use hvac_core::{climate, Context, EntityId};
use hvac_service_registry::RemoteCommand;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::command::ClimateService;
use crate::error::{TransactionError, TransactionResult};

/// One dispatched service call
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionAction {
    pub target: EntityId,
    pub service: ClimateService,
    pub data: Map<String, Value>,
}

/// Merged payload and context of one (target, service) pair
#[derive(Debug, Default)]
struct PendingAction {
    data: Map<String, Value>,
    context: Option<Context>,
}

/// Buffer of commands dispatched together on commit
#[derive(Debug, Default)]
pub struct Transaction {
    in_progress: bool,
    actions: IndexMap<EntityId, IndexMap<ClimateService, PendingAction>>,
    context: Option<Context>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_progress(&self) -> bool {
        self.in_progress
    }

    pub fn context(&self) -> Option<&Context> {
        self.context.as_ref()
    }

    pub fn set_context(&mut self, context: Option<Context>) {
        self.context = context;
    }

    /// Number of staged service calls
    pub fn len(&self) -> usize {
        self.actions.values().map(|services| services.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start collecting commands
    pub fn begin(&mut self, context: Option<Context>) -> TransactionResult<()> {
        if self.in_progress {
            return Err(TransactionError::AlreadyInProgress);
        }

        self.context = context;
        self.in_progress = true;
        self.actions.clear();
        Ok(())
    }

    /// Stage a service call, merging with a previous one for the same target
    ///
    /// A given `context` replaces the one staged earlier for the pair.
    pub fn add(
        &mut self,
        target: &EntityId,
        service: ClimateService,
        data: Map<String, Value>,
        context: Option<Context>,
    ) -> TransactionResult<()> {
        if !self.in_progress {
            return Err(TransactionError::NotInProgress { op: "add" });
        }

        let staged = self
            .actions
            .entry(target.clone())
            .or_default()
            .entry(service)
            .or_default();
        staged.data.extend(data);
        if context.is_some() {
            staged.context = context;
        }
        Ok(())
    }

    /// Drop every staged call without dispatching
    pub fn cancel(&mut self) -> TransactionResult<()> {
        if !self.in_progress {
            return Err(TransactionError::NotInProgress { op: "cancel" });
        }

        self.in_progress = false;
        self.actions.clear();
        Ok(())
    }

    /// Dispatch every staged call in insertion order
    ///
    /// A failed call is logged and does not stop the others. Returns the
    /// dispatched calls.
    pub async fn commit(
        &mut self,
        commander: &dyn RemoteCommand,
    ) -> TransactionResult<Vec<TransactionAction>> {
        if !self.in_progress {
            return Err(TransactionError::NotInProgress { op: "commit" });
        }

        let actions = std::mem::take(&mut self.actions);
        let default_context = self.context.take();
        self.in_progress = false;

        let mut dispatched = Vec::with_capacity(actions.len());
        for (target, services) in actions {
            for (service, PendingAction { data, context }) in services {
                let context = context
                    .or_else(|| default_context.clone())
                    .unwrap_or_default();
                debug!(target = %target, service = %service, "Dispatching transaction action");
                if let Err(e) = commander
                    .call(
                        climate::DOMAIN,
                        service.as_str(),
                        Value::Object(data.clone()),
                        &target,
                        context,
                    )
                    .await
                {
                    warn!(target = %target, service = %service, error = %e, "Transaction action failed");
                }
                dispatched.push(TransactionAction {
                    target: target.clone(),
                    service,
                    data,
                });
            }
        }

        Ok(dispatched)
    }
}
