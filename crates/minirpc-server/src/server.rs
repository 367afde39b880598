use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use minirpc_common::protocol::error::{MinirpcError, Result};
use minirpc_registry::ServiceRegistry;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::router::Router;
use crate::session_pool::SessionPool;

/// Pause after a failed accept so a persistent error (e.g. out of file
/// descriptors) does not spin the loop
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// TCP RPC server.
///
/// Every accepted connection runs in its own task with a [`Session`](crate::Session)
/// taken from the server's [`SessionPool`]. Sessions share the router
/// read-only.
///
/// # Example
///
/// ```no_run
/// use minirpc_server::{Router, RpcServer, ServerConfig};
///
/// # #[tokio::main]
/// # async fn main() -> minirpc_common::Result<()> {
/// let mut router = Router::new();
/// router.register_typed("CalculatorService", "add", |(a, b): (i64, i64)| Ok(a + b));
///
/// let server = RpcServer::bind("127.0.0.1:12345", router, ServerConfig::default()).await?;
/// server.run().await
/// # }
/// ```
pub struct RpcServer {
    listener: TcpListener,
    router: Arc<Router>,
    pool: Arc<SessionPool>,
    config: ServerConfig,
}

impl RpcServer {
    /// Bind a listener on `addr`.
    pub async fn bind(addr: &str, router: Router, config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| MinirpcError::Connection(format!("Failed to bind to {}: {}", addr, e)))?;

        Ok(Self {
            listener,
            router: Arc::new(router),
            pool: Arc::new(SessionPool::new(&config)),
            config,
        })
    }

    /// Gets the actual bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| MinirpcError::Connection(format!("Failed to get local addr: {}", e)))
    }

    /// `host:port` other processes can use to reach this server.
    ///
    /// A wildcard bind address is advertised as loopback.
    pub fn advertised_endpoint(&self) -> Result<String> {
        let mut addr = self.local_addr()?;
        if addr.ip().is_unspecified() {
            match addr {
                SocketAddr::V4(_) => addr.set_ip([127, 0, 0, 1].into()),
                SocketAddr::V6(_) => addr.set_ip(std::net::Ipv6Addr::LOCALHOST.into()),
            }
        }
        Ok(addr.to_string())
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn session_pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Publish `endpoint` as an instance of `service_name`.
    ///
    /// Fails with `Config` if the router has no methods for the service.
    pub async fn register_with(&self, registry: &ServiceRegistry, service_name: &str, endpoint: &str) -> Result<()> {
        if !self.router.services().contains(&service_name) {
            return Err(MinirpcError::Config(format!(
                "Service '{}' has no registered methods",
                service_name
            )));
        }
        registry.register_service(service_name, endpoint).await
    }

    /// Publish `endpoint` for every service the router knows. Returns the
    /// service names registered.
    pub async fn advertise(&self, registry: &ServiceRegistry, endpoint: &str) -> Result<Vec<String>> {
        let mut registered = Vec::new();
        for service_name in self.router.services() {
            registry.register_service(service_name, endpoint).await?;
            registered.push(service_name.to_string());
        }
        Ok(registered)
    }

    /// Accept connections forever.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` completes.
    ///
    /// Connections already accepted keep running to completion in their own
    /// tasks; only the listener stops.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!("minirpc server listening on {}", self.local_addr()?);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting connections");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_session(stream, peer),
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        Ok(())
    }

    fn spawn_session(&self, stream: TcpStream, peer: SocketAddr) {
        debug!(%peer, "Connection established");
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, "Failed to set TCP_NODELAY: {}", e);
        }

        let pool = Arc::clone(&self.pool);
        let router = Arc::clone(&self.router);

        tokio::spawn(async move {
            let mut session = pool.acquire(stream, peer.to_string(), router).await;
            session.run().await;
            debug!(%peer, requests = session.requests_served(), "Connection finished");
            pool.release(session).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minirpc_registry::MemoryCoordinator;
    use tokio::sync::oneshot;

    fn calculator() -> Router {
        let mut router = Router::new();
        router.register_typed("CalculatorService", "add", |(a, b): (i64, i64)| Ok(a + b));
        router
    }

    #[tokio::test]
    async fn test_bind_and_local_addr() {
        let server = RpcServer::bind("127.0.0.1:0", calculator(), ServerConfig::default())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(server.advertised_endpoint().unwrap(), addr.to_string());
    }

    #[tokio::test]
    async fn test_wildcard_is_advertised_as_loopback() {
        let server = RpcServer::bind("0.0.0.0:0", calculator(), ServerConfig::default())
            .await
            .unwrap();
        let port = server.local_addr().unwrap().port();
        assert_eq!(server.advertised_endpoint().unwrap(), format!("127.0.0.1:{}", port));
    }

    #[tokio::test]
    async fn test_bind_invalid_address() {
        let result = RpcServer::bind("not-an-address", calculator(), ServerConfig::default()).await;
        assert!(matches!(result, Err(MinirpcError::Connection(_))));
    }

    #[tokio::test]
    async fn test_run_until_stops() {
        let server = RpcServer::bind("127.0.0.1:0", calculator(), ServerConfig::default())
            .await
            .unwrap();
        let (tx, rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(server.run_until(async {
            let _ = rx.await;
        }));
        tx.send(()).unwrap();

        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_register_with() {
        let ensemble = MemoryCoordinator::new();
        let registry = ServiceRegistry::new(Arc::new(ensemble.connect()));
        let server = RpcServer::bind("127.0.0.1:0", calculator(), ServerConfig::default())
            .await
            .unwrap();
        let endpoint = server.advertised_endpoint().unwrap();

        server
            .register_with(&registry, "CalculatorService", &endpoint)
            .await
            .unwrap();
        assert_eq!(
            registry.get_service_endpoints("CalculatorService").await.unwrap(),
            vec![endpoint.clone()]
        );

        let err = server.register_with(&registry, "Unknown", &endpoint).await.unwrap_err();
        assert!(matches!(err, MinirpcError::Config(_)));
    }

    #[tokio::test]
    async fn test_advertise_all_services() {
        let ensemble = MemoryCoordinator::new();
        let registry = ServiceRegistry::new(Arc::new(ensemble.connect()));

        let mut router = calculator();
        router.register_method("ping", |_| Ok(serde_json::json!("pong")));
        router.register("EchoService", "echo", |params| Ok(serde_json::Value::Array(params)));

        let server = RpcServer::bind("127.0.0.1:0", router, ServerConfig::default())
            .await
            .unwrap();
        let registered = server.advertise(&registry, "127.0.0.1:7000").await.unwrap();

        assert_eq!(registered, vec!["CalculatorService", "EchoService"]);
        assert_eq!(
            registry.get_service_endpoints("EchoService").await.unwrap(),
            vec!["127.0.0.1:7000"]
        );
    }
}
