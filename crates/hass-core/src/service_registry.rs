//! Service registry with async handlers

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

use crate::ServiceCall;

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

/// Registry of callable services, keyed by `domain.service`.
pub struct ServiceRegistry {
    services: DashMap<String, ServiceHandler>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
        }
    }

    /// Register a service handler.
    pub fn register<F, Fut>(&self, domain: impl Into<String>, service: impl Into<String>, handler: F)
    where
        F: Fn(ServiceCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult> + Send + 'static,
    {
        let domain = domain.into();
        let service = service.into();
        debug!(domain = %domain, service = %service, "Registering service");

        let handler: ServiceHandler = Arc::new(move |call| Box::pin(handler(call)) as ServiceFuture);
        self.services.insert(format!("{domain}.{service}"), handler);
    }

    /// Check whether a service is registered.
    pub fn has_service(&self, domain: &str, service: &str) -> bool {
        self.services.contains_key(&format!("{domain}.{service}"))
    }

    /// Remove a registered service.
    pub fn remove(&self, domain: &str, service: &str) {
        self.services.remove(&format!("{domain}.{service}"));
    }

    /// Call a service, routing to the registered handler.
    pub async fn call(&self, call: ServiceCall) -> ServiceResult {
        let key = call.service_id();
        let handler = match self.services.get(&key) {
            Some(entry) => entry.value().clone(),
            None => {
                return Err(ServiceError::NotFound {
                    domain: call.domain,
                    service: call.service,
                })
            }
        };
        handler(call).await
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Context;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn register_and_call() {
        let registry = ServiceRegistry::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_handler = calls.clone();

        registry.register("climate", "turn_off", move |_call| {
            let calls = calls_in_handler.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }
        });

        assert!(registry.has_service("climate", "turn_off"));

        let result = registry
            .call(ServiceCall::new(
                "climate",
                "turn_off",
                json!({"entity_id": "climate.test"}),
                Context::new(),
            ))
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_service_is_not_found() {
        let registry = ServiceRegistry::new();
        let result = registry
            .call(ServiceCall::simple("notify", "nobody", Context::new()))
            .await;
        assert!(matches!(result, Err(ServiceError::NotFound { .. })));
    }
}
