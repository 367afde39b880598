use std::sync::Arc;

use minirpc_common::protocol::error::{MinirpcError, Result};
use minirpc_common::protocol::{Params, Request};
use minirpc_registry::ServiceRegistry;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::client::into_result;
use crate::load_balancer::LoadBalancer;
use crate::pool::ConnectionPool;

/// Caller-side stand-in for a logical service.
///
/// Each call resolves the service's endpoints through the registry, lets the
/// load balancer pick one, borrows a pooled connection to it and performs a
/// single request/response exchange. Failures are returned to the caller and
/// never retried.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use minirpc_client::{ClientConfig, ConnectionPool, PoolConfig, ServiceProxy};
/// use minirpc_registry::{MemoryCoordinator, ServiceRegistry};
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> minirpc_common::Result<()> {
/// let ensemble = MemoryCoordinator::new();
/// let registry = Arc::new(ServiceRegistry::new(Arc::new(ensemble.connect())));
/// let pool = Arc::new(ConnectionPool::new(ClientConfig::default(), PoolConfig::default()));
///
/// let calculator = ServiceProxy::new("CalculatorService", registry, pool);
/// let sum: i64 = calculator.call_typed("add", vec![json!(4), json!(5)]).await?;
/// # Ok(())
/// # }
/// ```
pub struct ServiceProxy {
    service_name: String,
    registry: Arc<ServiceRegistry>,
    pool: Arc<ConnectionPool>,
    balancer: LoadBalancer,
}

impl ServiceProxy {
    /// Proxy using round-robin selection.
    pub fn new(service_name: impl Into<String>, registry: Arc<ServiceRegistry>, pool: Arc<ConnectionPool>) -> Self {
        Self {
            service_name: service_name.into(),
            registry,
            pool,
            balancer: LoadBalancer::round_robin(),
        }
    }

    pub fn with_load_balancer(mut self, balancer: LoadBalancer) -> Self {
        self.balancer = balancer;
        self
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn load_balancer(&self) -> &LoadBalancer {
        &self.balancer
    }

    /// Endpoint the next call would go to. Advances the balancer.
    pub async fn resolve(&self) -> Result<String> {
        let endpoints = self
            .registry
            .get_service_endpoints(&self.service_name)
            .await
            .map_err(|e| {
                MinirpcError::Discovery(format!("Failed to resolve '{}': {}", self.service_name, e))
            })?;

        if endpoints.is_empty() {
            return Err(MinirpcError::NoAvailableServiceInstances(self.service_name.clone()));
        }

        Ok(self.balancer.select(&endpoints)?.to_string())
    }

    /// Call `method_name` on one instance of the service.
    ///
    /// A nonzero response code comes back as [`MinirpcError::Remote`].
    pub async fn call(&self, method_name: &str, params: Params) -> Result<Value> {
        let endpoint = self.resolve().await?;
        debug!(service = %self.service_name, method = method_name, %endpoint, "Calling");

        let mut client = self.pool.acquire(&endpoint).await?;
        let request = Request::new(self.service_name.as_str(), method_name, params);
        let result = client.send(&request).await;
        self.pool.release(client).await;

        into_result(result?)
    }

    /// [`call`](Self::call) and deserialize the result into `R`.
    pub async fn call_typed<R>(&self, method_name: &str, params: Params) -> Result<R>
    where
        R: DeserializeOwned,
    {
        let value = self.call(method_name, params).await?;
        Ok(serde_json::from_value(value)?)
    }
}
