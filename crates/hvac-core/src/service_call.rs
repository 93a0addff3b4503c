//! Service call type delivered to remote command handlers

use crate::{Context, EntityId};
use serde::{Deserialize, Serialize};

/// A call to a device service, e.g. `climate.set_temperature`
///
/// `service_data` carries the command payload; `target` is the device the
/// command is addressed to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCall {
    /// The domain the service belongs to (e.g., "climate")
    pub domain: String,

    /// The service name (e.g., "set_temperature")
    pub service: String,

    /// Command payload
    pub service_data: serde_json::Value,

    /// Device the command targets
    pub target: EntityId,

    /// Context tracking who initiated this call
    pub context: Context,
}

impl ServiceCall {
    /// Create a new service call
    pub fn new(
        domain: impl Into<String>,
        service: impl Into<String>,
        service_data: serde_json::Value,
        target: EntityId,
        context: Context,
    ) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            service_data,
            target,
            context,
        }
    }

    /// Get the full service identifier (domain.service)
    pub fn service_id(&self) -> String {
        format!("{}.{}", self.domain, self.service)
    }

    /// Get a value from service_data
    pub fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.service_data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}
