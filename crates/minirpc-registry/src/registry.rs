use std::collections::HashMap;
use std::sync::Arc;

use minirpc_common::protocol::error::{MinirpcError, Result};
use minirpc_common::Endpoint;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::coordinator::{join_path, validate_path, ChildWatch, Coordinator, CreateMode, WatchEvent};

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Namespace root under which every service lives
    pub root: String,
    /// Mode used by [`ServiceRegistry::register_service`]
    pub mode: CreateMode,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            root: "/services".to_string(),
            mode: CreateMode::Ephemeral,
        }
    }
}

impl RegistryConfig {
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_mode(mut self, mode: CreateMode) -> Self {
        self.mode = mode;
        self
    }
}

#[derive(Debug, Clone)]
struct CachedService {
    endpoints: Vec<String>,
    /// Kept current by a watch task; reads are served from here
    watched: bool,
}

type Cache = Arc<RwLock<HashMap<String, CachedService>>>;

/// Client for the `/services/<name>/<host:port>` namespace.
///
/// Every operation awaits the coordinator before returning, so a caller never
/// sees a listing that is still being filled in. Endpoint lists are cached:
/// a watched service is served from the cache, which its watch task keeps
/// current, and an unwatched one is read through to the coordinator.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use minirpc_registry::{MemoryCoordinator, ServiceRegistry};
///
/// # #[tokio::main]
/// # async fn main() -> minirpc_common::Result<()> {
/// let ensemble = MemoryCoordinator::new();
/// let registry = ServiceRegistry::new(Arc::new(ensemble.connect()));
///
/// registry.register_service("Calc", "127.0.0.1:9001").await?;
/// assert_eq!(registry.get_service_endpoints("Calc").await?, vec!["127.0.0.1:9001"]);
/// # Ok(())
/// # }
/// ```
pub struct ServiceRegistry {
    coordinator: Arc<dyn Coordinator>,
    config: RegistryConfig,
    cache: Cache,
    watches: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl ServiceRegistry {
    pub fn new(coordinator: Arc<dyn Coordinator>) -> Self {
        Self::with_config(coordinator, RegistryConfig::default())
    }

    pub fn with_config(coordinator: Arc<dyn Coordinator>, config: RegistryConfig) -> Self {
        Self {
            coordinator,
            config,
            cache: Arc::new(RwLock::new(HashMap::new())),
            watches: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Path of the node that holds a service's endpoints.
    pub fn service_path(&self, service_name: &str) -> Result<String> {
        if service_name.is_empty() || service_name.contains('/') {
            return Err(MinirpcError::Config(format!(
                "Invalid service name '{}'",
                service_name
            )));
        }
        Ok(join_path(&self.config.root, service_name))
    }

    /// Create every missing node along `path`. Existing nodes are left alone.
    pub async fn ensure_path_exists(&self, path: &str) -> Result<()> {
        ensure_path(self.coordinator.as_ref(), path).await
    }

    /// Register `endpoint` under `service_name` using the configured mode.
    pub async fn register_service(&self, service_name: &str, endpoint: &str) -> Result<()> {
        self.register_service_with_mode(service_name, endpoint, self.config.mode)
            .await
    }

    /// Register `endpoint` under `service_name`.
    ///
    /// Registering an endpoint that is already present is not an error.
    pub async fn register_service_with_mode(
        &self,
        service_name: &str,
        endpoint: &str,
        mode: CreateMode,
    ) -> Result<()> {
        Endpoint::parse(endpoint)?;
        let service_path = self.service_path(service_name)?;
        self.ensure_path_exists(&service_path).await?;

        let node = join_path(&service_path, endpoint);
        match self.coordinator.create(&node, mode).await {
            Ok(()) => {
                info!(service = service_name, endpoint, ?mode, "Registered service endpoint");
                Ok(())
            }
            Err(MinirpcError::NodeExists(_)) => {
                debug!(service = service_name, endpoint, "Endpoint already registered");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Remove `endpoint` from `service_name`. A missing node is not an error.
    pub async fn unregister_service(&self, service_name: &str, endpoint: &str) -> Result<()> {
        let node = join_path(&self.service_path(service_name)?, endpoint);
        match self.coordinator.delete(&node).await {
            Ok(()) => {
                info!(service = service_name, endpoint, "Unregistered service endpoint");
                Ok(())
            }
            Err(MinirpcError::NoNode(_)) => {
                debug!(service = service_name, endpoint, "Endpoint was not registered");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Current endpoints of `service_name`, empty if the service is unknown.
    pub async fn get_service_endpoints(&self, service_name: &str) -> Result<Vec<String>> {
        if let Some(cached) = self.cache.read().await.get(service_name) {
            if cached.watched {
                return Ok(cached.endpoints.clone());
            }
        }

        let service_path = self.service_path(service_name)?;
        let endpoints = match self.coordinator.get_children(&service_path).await {
            Ok(children) => children,
            Err(MinirpcError::NoNode(_)) => Vec::new(),
            Err(e) => return Err(e),
        };

        let mut cache = self.cache.write().await;
        let entry = cache
            .entry(service_name.to_string())
            .or_insert_with(|| CachedService {
                endpoints: Vec::new(),
                watched: false,
            });
        // A watch armed meanwhile owns the entry
        if !entry.watched {
            entry.endpoints = endpoints.clone();
        }

        Ok(endpoints)
    }

    /// Last endpoint list seen for `service_name`, without contacting the
    /// coordinator.
    pub async fn cached_endpoints(&self, service_name: &str) -> Option<Vec<String>> {
        self.cache
            .read()
            .await
            .get(service_name)
            .map(|cached| cached.endpoints.clone())
    }

    /// Keep the cached endpoints of `service_name` current.
    ///
    /// Creates the service node if needed, lists it and arms a child watch,
    /// then spawns a task that refreshes the cache and re-arms the watch on
    /// every notification. Calling this for an already watched service does
    /// nothing.
    pub async fn watch_service(&self, service_name: &str) -> Result<()> {
        let mut watches = self.watches.lock().await;
        if watches
            .get(service_name)
            .is_some_and(|handle| !handle.is_finished())
        {
            return Ok(());
        }

        let service_path = self.service_path(service_name)?;
        self.ensure_path_exists(&service_path).await?;
        let (endpoints, watch) = self.coordinator.watch_children(&service_path).await?;

        self.cache.write().await.insert(
            service_name.to_string(),
            CachedService {
                endpoints,
                watched: true,
            },
        );

        let coordinator = Arc::clone(&self.coordinator);
        let cache = Arc::clone(&self.cache);
        let name = service_name.to_string();

        let handle = tokio::spawn(async move {
            let mut watch = watch;
            loop {
                let event = match watch.await {
                    Ok(event) => event,
                    Err(_) => {
                        debug!(service = %name, "Watch channel dropped");
                        break;
                    }
                };

                if event == WatchEvent::SessionClosed {
                    warn!(service = %name, "Coordination session closed, stopping watch");
                    break;
                }
                debug!(service = %name, ?event, "Watch fired");

                let (endpoints, next) = match rearm(coordinator.as_ref(), &service_path).await {
                    Ok(rearmed) => rearmed,
                    Err(e) => {
                        warn!(service = %name, "Failed to re-arm watch: {}", e);
                        break;
                    }
                };

                info!(service = %name, endpoints = endpoints.len(), "Service endpoints changed");
                cache.write().await.insert(
                    name.clone(),
                    CachedService {
                        endpoints,
                        watched: true,
                    },
                );
                watch = next;
            }

            if let Some(cached) = cache.write().await.get_mut(&name) {
                cached.watched = false;
            }
        });

        info!(service = service_name, "Watching service");
        if let Some(previous) = watches.insert(service_name.to_string(), handle) {
            previous.abort();
        }
        Ok(())
    }

    /// Stop watching `service_name`. Returns whether a watch was active.
    pub async fn unwatch_service(&self, service_name: &str) -> bool {
        let handle = self.watches.lock().await.remove(service_name);
        let Some(handle) = handle else {
            return false;
        };
        // Abort lands at the task's next await; wait so it cannot write the
        // cache after this point.
        handle.abort();
        let _ = handle.await;

        if let Some(cached) = self.cache.write().await.get_mut(service_name) {
            cached.watched = false;
        }
        debug!(service = service_name, "Stopped watching service");
        true
    }

    pub async fn is_watching(&self, service_name: &str) -> bool {
        self.watches
            .lock()
            .await
            .get(service_name)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop all watches and end the coordination session.
    ///
    /// Ephemeral registrations made through this registry disappear.
    pub async fn close(&self) -> Result<()> {
        let handles: Vec<JoinHandle<()>> = self.watches.lock().await.drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.abort();
            let _ = handle.await;
        }
        self.cache.write().await.clear();
        self.coordinator.close().await
    }
}

impl Drop for ServiceRegistry {
    fn drop(&mut self) {
        for (_, handle) in self.watches.get_mut().drain() {
            handle.abort();
        }
    }
}

async fn ensure_path(coordinator: &dyn Coordinator, path: &str) -> Result<()> {
    validate_path(path)?;

    let mut current = String::new();
    for component in path.split('/').filter(|c| !c.is_empty()) {
        current.push('/');
        current.push_str(component);

        if coordinator.exists(&current).await? {
            continue;
        }
        match coordinator.create(&current, CreateMode::Persistent).await {
            Ok(()) => debug!("Created path node {}", current),
            // Lost a race with another creator
            Err(MinirpcError::NodeExists(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// List and re-arm in one step, recreating the service node if it was deleted.
async fn rearm(coordinator: &dyn Coordinator, service_path: &str) -> Result<(Vec<String>, ChildWatch)> {
    match coordinator.watch_children(service_path).await {
        Err(MinirpcError::NoNode(_)) => {
            ensure_path(coordinator, service_path).await?;
            coordinator.watch_children(service_path).await
        }
        other => other,
    }
}
