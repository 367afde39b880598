use std::collections::HashMap;

use minirpc_common::protocol::error::Result;
use tokio::sync::Mutex;
use tracing::debug;

use crate::client::RpcClient;
use crate::config::ClientConfig;

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Idle connections kept per endpoint; extra connections are closed on
    /// release
    pub max_idle_per_endpoint: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_endpoint: 8,
        }
    }
}

/// Idle [`RpcClient`]s grouped by endpoint.
///
/// A connection is checked out for exactly one call at a time. It comes back
/// through [`release`](Self::release) and is kept only if it is still usable
/// and the endpoint has room, so a connection that saw a framing or transport
/// error is never handed out again.
///
/// # Example
///
/// ```no_run
/// use minirpc_client::{ClientConfig, ConnectionPool, PoolConfig};
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> minirpc_common::Result<()> {
/// let pool = ConnectionPool::new(ClientConfig::default(), PoolConfig::default());
///
/// let mut client = pool.acquire("127.0.0.1:12345").await?;
/// let sum = client.call("CalculatorService", "add", vec![json!(4), json!(5)]).await?;
/// pool.release(client).await;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionPool {
    client_config: ClientConfig,
    config: PoolConfig,
    idle: Mutex<HashMap<String, Vec<RpcClient>>>,
}

impl ConnectionPool {
    pub fn new(client_config: ClientConfig, config: PoolConfig) -> Self {
        Self {
            client_config,
            config,
            idle: Mutex::new(HashMap::new()),
        }
    }

    pub fn client_config(&self) -> &ClientConfig {
        &self.client_config
    }

    /// Take an idle connection to `endpoint`, or open a new one.
    ///
    /// Idle connections the server has closed meanwhile (idle timeout,
    /// restart) are discarded here instead of failing the next call.
    pub async fn acquire(&self, endpoint: &str) -> Result<RpcClient> {
        loop {
            let reused = {
                let mut idle = self.idle.lock().await;
                idle.get_mut(endpoint).and_then(Vec::pop)
            };

            let Some(mut client) = reused else {
                break;
            };
            if client.check_idle() {
                debug!(endpoint, "Reusing pooled connection");
                return Ok(client);
            }
            debug!(endpoint, "Discarding closed pooled connection");
        }

        RpcClient::connect(endpoint, &self.client_config).await
    }

    /// Hand a connection back after a call.
    pub async fn release(&self, client: RpcClient) {
        if !client.is_usable() {
            debug!(endpoint = client.endpoint(), "Dropping unusable connection");
            return;
        }

        let mut idle = self.idle.lock().await;
        let connections = idle.entry(client.endpoint().to_string()).or_default();
        if connections.len() < self.config.max_idle_per_endpoint {
            connections.push(client);
        }
    }

    pub async fn idle_count(&self, endpoint: &str) -> usize {
        self.idle.lock().await.get(endpoint).map_or(0, Vec::len)
    }

    pub async fn total_idle(&self) -> usize {
        self.idle.lock().await.values().map(Vec::len).sum()
    }

    /// Close every idle connection.
    pub async fn clear(&self) {
        self.idle.lock().await.clear();
    }
}
