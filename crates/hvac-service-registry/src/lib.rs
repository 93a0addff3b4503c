//! Remote command interface and service registry
//!
//! Groups never talk to devices directly. They issue commands through the
//! [`RemoteCommand`] trait, which awaits until the device acknowledged the
//! command. [`ServiceRegistry`] is the in-process implementation: it routes
//! `domain.service` calls to registered async handlers.

use async_trait::async_trait;
use dashmap::DashMap;
use hvac_core::{Context, EntityId, ServiceCall};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Result type for service calls
pub type ServiceResult = Result<Option<serde_json::Value>, ServiceError>;

/// Future type for async service handlers
pub type ServiceFuture = Pin<Box<dyn Future<Output = ServiceResult> + Send>>;

/// Service handler function type
pub type ServiceHandler = Arc<dyn Fn(ServiceCall) -> ServiceFuture + Send + Sync>;

/// Errors that can occur when calling services
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("service not found: {domain}.{service}")]
    NotFound { domain: String, service: String },

    #[error("service call failed: {0}")]
    CallFailed(String),

    #[error("invalid service data: {0}")]
    InvalidData(String),
}

/// Issues a command to a device and waits for its completion
///
/// Retries and timeouts are the implementation's concern; callers await the
/// call and treat an error as a failed command.
#[async_trait]
pub trait RemoteCommand: Send + Sync {
    async fn call(
        &self,
        domain: &str,
        service: &str,
        data: serde_json::Value,
        target: &EntityId,
        context: Context,
    ) -> Result<(), ServiceError>;
}

/// The service registry manages all registered services
pub struct ServiceRegistry {
    /// Handlers indexed by "domain.service" key
    services: DashMap<String, ServiceHandler>,
}

impl ServiceRegistry {
    /// Create a new empty service registry
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
        }
    }

    /// Register a new service
    #[instrument(skip(self, domain, service, handler))]
    pub fn register<F, Fut>(&self, domain: impl Into<String>, service: impl Into<String>, handler: F)
    where
        F: Fn(ServiceCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult> + Send + 'static,
    {
        let domain = domain.into();
        let service = service.into();

        debug!(domain = %domain, service = %service, "Registering service");

        let handler: ServiceHandler =
            Arc::new(move |call| Box::pin(handler(call)) as ServiceFuture);
        self.services.insert(format!("{}.{}", domain, service), handler);
    }

    /// Call a service and wait for the handler to finish
    #[instrument(skip(self, service_data, context), fields(target = %target))]
    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        service_data: serde_json::Value,
        target: &EntityId,
        context: Context,
    ) -> ServiceResult {
        let key = format!("{}.{}", domain, service);

        let handler = self
            .services
            .get(&key)
            .map(|h| h.clone())
            .ok_or_else(|| {
                warn!(domain = %domain, service = %service, "Service not found");
                ServiceError::NotFound {
                    domain: domain.to_string(),
                    service: service.to_string(),
                }
            })?;

        debug!(domain = %domain, service = %service, "Calling service");
        handler(ServiceCall::new(domain, service, service_data, target.clone(), context)).await
    }

    /// Check if a service exists
    pub fn has_service(&self, domain: &str, service: &str) -> bool {
        self.services.contains_key(&format!("{}.{}", domain, service))
    }

    /// Unregister a service
    pub fn unregister(&self, domain: &str, service: &str) -> bool {
        self.services
            .remove(&format!("{}.{}", domain, service))
            .is_some()
    }

    /// Get total number of registered services
    pub fn service_count(&self) -> usize {
        self.services.len()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteCommand for ServiceRegistry {
    async fn call(
        &self,
        domain: &str,
        service: &str,
        data: serde_json::Value,
        target: &EntityId,
        context: Context,
    ) -> Result<(), ServiceError> {
        self.call_service(domain, service, data, target, context)
            .await
            .map(|_| ())
    }
}

/// Thread-safe wrapper for ServiceRegistry
pub type SharedServiceRegistry = Arc<ServiceRegistry>;
