//! In-process discovery demo.
//!
//! Starts several calculator servers on loopback, registers each through its
//! own coordination session, then drives a [`ServiceProxy`] with the chosen
//! load balancing policy and reports which server answered how often.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use minirpc_client::{ClientConfig, ConnectionPool, LoadBalancePolicy, LoadBalancer, PoolConfig, ServiceProxy};
use minirpc_registry::{MemoryCoordinator, ServiceRegistry};
use minirpc_server::{RpcServer, ServerConfig};
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::info;

use crate::{counted_calculator_router, CALCULATOR_SERVICE};

/// Outcome of one demo run.
#[derive(Debug, Clone)]
pub struct DemoReport {
    pub policy: LoadBalancePolicy,
    /// Endpoints in registry order, the order the balancer indexes into
    pub endpoints: Vec<String>,
    /// `(a, b, a + b)` for every call made
    pub sums: Vec<(i64, i64, Value)>,
    /// Calls served per endpoint
    pub served_by: BTreeMap<String, usize>,
}

struct Instance {
    endpoint: String,
    calls: Arc<AtomicUsize>,
    registry: ServiceRegistry,
}

/// Run `calls` additions against `servers` calculator instances.
pub async fn run_demo(servers: usize, calls: usize, policy: LoadBalancePolicy) -> Result<DemoReport> {
    if servers == 0 {
        bail!("The demo needs at least one server");
    }
    let balancer = LoadBalancer::from_policy(&policy)?;

    let ensemble = MemoryCoordinator::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut instances = Vec::with_capacity(servers);
    let mut tasks = Vec::with_capacity(servers);

    for _ in 0..servers {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = counted_calculator_router(Arc::clone(&calls));
        let server = RpcServer::bind("127.0.0.1:0", router, ServerConfig::default()).await?;
        let endpoint = server.advertised_endpoint()?;

        let registry = ServiceRegistry::new(Arc::new(ensemble.connect()));
        server.advertise(&registry, &endpoint).await?;
        info!(%endpoint, "Demo server registered");

        let mut shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(server.run_until(async move {
            let _ = shutdown.changed().await;
        })));
        instances.push(Instance {
            endpoint,
            calls,
            registry,
        });
    }

    let registry = Arc::new(ServiceRegistry::new(Arc::new(ensemble.connect())));
    registry.watch_service(CALCULATOR_SERVICE).await?;
    let endpoints = registry.get_service_endpoints(CALCULATOR_SERVICE).await?;

    let pool = Arc::new(ConnectionPool::new(ClientConfig::default(), PoolConfig::default()));
    let proxy = ServiceProxy::new(CALCULATOR_SERVICE, Arc::clone(&registry), Arc::clone(&pool))
        .with_load_balancer(balancer);

    let mut sums = Vec::with_capacity(calls);
    for i in 0..calls {
        let (a, b) = (i as i64, (i * 10) as i64);
        let sum = proxy.call("add", vec![json!(a), json!(b)]).await?;
        sums.push((a, b, sum));
    }

    let served_by = instances
        .iter()
        .map(|instance| (instance.endpoint.clone(), instance.calls.load(Ordering::Relaxed)))
        .collect();

    pool.clear().await;
    registry.close().await?;
    let _ = shutdown_tx.send(true);
    for task in tasks {
        task.await??;
    }
    for instance in instances {
        instance.registry.close().await?;
    }

    Ok(DemoReport {
        policy,
        endpoints,
        sums,
        served_by,
    })
}
