//! # minirpc CLI Entry Point
//!
//! Main binary for the minirpc framework. Runs a coordination service,
//! serves the built-in calculator, makes single calls (direct or through
//! discovery) and runs a self-contained discovery demo.
//!
//! ## Usage
//!
//! ```bash
//! # Coordination service for discovery
//! minirpc registry -b 0.0.0.0:2181
//!
//! # Serve CalculatorService and advertise it there
//! minirpc serve -b 0.0.0.0:12345 --registry 127.0.0.1:2181
//!
//! # Call one server directly (prints the raw JSON result)
//! minirpc call CalculatorService add -p '[4, 5]' --endpoint 127.0.0.1:12345
//!
//! # Or let discovery pick an instance
//! minirpc call CalculatorService add -p '[4, 5]' --registry 127.0.0.1:2181 --policy random
//!
//! # Three servers behind an in-process registry, weighted selection
//! minirpc demo --servers 3 --calls 12 --policy weighted:3,2,1
//! ```
//!
//! Logging goes to stderr through `tracing`; set `RUST_LOG` to change the
//! level (default `info`).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use argh::FromArgs;
use minirpc_cli::demo::run_demo;
use minirpc_cli::{calculator_router, parse_params};
use minirpc_client::{ClientConfig, ConnectionPool, LoadBalancePolicy, LoadBalancer, PoolConfig, RpcClient, ServiceProxy};
use minirpc_common::transport::DEFAULT_MAX_BODY_LEN;
use minirpc_registry::{CoordinatorServer, MemoryCoordinator, RemoteCoordinator, ServiceRegistry};
use minirpc_server::config::DEFAULT_SESSION_POOL_CAPACITY;
use minirpc_server::{RpcServer, ServerConfig};

#[derive(FromArgs)]
/// minirpc - minimal RPC framework
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Registry(RegistryArgs),
    Serve(ServeArgs),
    Call(CallArgs),
    Demo(DemoArgs),
}

/// Arguments for running the coordination service.
///
/// Every connected process holds one session; its ephemeral registrations
/// are removed when it disconnects.
#[derive(FromArgs)]
#[argh(subcommand, name = "registry")]
/// run the coordination service used for discovery
struct RegistryArgs {
    /// address to bind to
    #[argh(option, short = 'b', default = "\"0.0.0.0:2181\".into()")]
    bind: String,
}

/// Arguments for serving the built-in `CalculatorService`.
///
/// The server runs until interrupted with Ctrl-C. Connections already open
/// finish their current request. With `--registry` the server advertises
/// itself for as long as it runs.
#[derive(FromArgs)]
#[argh(subcommand, name = "serve")]
/// serve CalculatorService (add, sub)
struct ServeArgs {
    /// address to bind to
    #[argh(option, short = 'b', default = "\"0.0.0.0:12345\".into()")]
    bind: String,

    /// largest request body accepted, in bytes
    #[argh(option, long = "max-body-len", default = "DEFAULT_MAX_BODY_LEN")]
    max_body_len: usize,

    /// close connections idle for this many milliseconds
    #[argh(option, long = "idle-timeout-ms")]
    idle_timeout_ms: Option<u64>,

    /// number of idle sessions kept for reuse
    #[argh(option, long = "session-pool-capacity", default = "DEFAULT_SESSION_POOL_CAPACITY")]
    session_pool_capacity: usize,

    /// coordination service to advertise in, as host:port
    #[argh(option, short = 'r')]
    registry: Option<String>,

    /// host:port to advertise instead of the bound address
    #[argh(option)]
    advertise: Option<String>,
}

/// Arguments for a single call.
///
/// The target is either one server (`--endpoint`) or whichever instance the
/// load balancing policy picks from the coordination service (`--registry`).
/// Prints the result as raw JSON on stdout so it can be piped into other
/// tools. A nonzero response code is reported on stderr with a failing exit
/// status.
#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// call one method, directly or through discovery
struct CallArgs {
    /// service name
    #[argh(positional)]
    service: String,

    /// method name
    #[argh(positional)]
    method: String,

    /// parameters as a JSON array
    #[argh(option, short = 'p', long = "params", default = "\"[]\".into()")]
    params: String,

    /// server endpoint as host:port
    #[argh(option, short = 'e')]
    endpoint: Option<String>,

    /// coordination service to discover the server through, as host:port
    #[argh(option, short = 'r')]
    registry: Option<String>,

    /// load balancing policy with --registry: round-robin, random or weighted:<w1>,<w2>,...
    #[argh(option, long = "policy", default = "LoadBalancePolicy::RoundRobin")]
    policy: LoadBalancePolicy,

    /// request timeout in milliseconds
    #[argh(option, long = "timeout-ms", default = "30000")]
    timeout_ms: u64,
}

/// Arguments for the discovery demo.
#[derive(FromArgs)]
#[argh(subcommand, name = "demo")]
/// run servers, a registry and a proxy in one process
struct DemoArgs {
    /// number of calculator servers
    #[argh(option, short = 's', default = "3")]
    servers: usize,

    /// number of calls made through the proxy
    #[argh(option, short = 'n', default = "6")]
    calls: usize,

    /// load balancing policy: round-robin, random or weighted:<w1>,<w2>,...
    #[argh(option, long = "policy", default = "LoadBalancePolicy::RoundRobin")]
    policy: LoadBalancePolicy,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Keep stdout of `call` clean for piping
    if !matches!(cli.command, Commands::Call(_)) {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Registry(args) => run_registry(args).await,
        Commands::Serve(args) => run_serve(args).await,
        Commands::Call(args) => run_call(args).await,
        Commands::Demo(args) => run_demo_command(args).await,
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
    }
}

async fn run_registry(args: RegistryArgs) -> Result<()> {
    let server = CoordinatorServer::bind(&args.bind, MemoryCoordinator::new()).await?;
    server.run_until(shutdown_signal()).await?;
    Ok(())
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let mut config = ServerConfig::default()
        .with_max_body_len(args.max_body_len)
        .with_session_pool_capacity(args.session_pool_capacity);
    if let Some(ms) = args.idle_timeout_ms {
        config = config.with_idle_timeout(Duration::from_millis(ms));
    }

    let server = RpcServer::bind(&args.bind, calculator_router(), config).await?;
    tracing::info!("Serving {:?}", server.router().services());

    let registry = match &args.registry {
        Some(addr) => {
            let endpoint = match args.advertise {
                Some(endpoint) => endpoint,
                None => server.advertised_endpoint()?,
            };
            let registry = ServiceRegistry::new(Arc::new(RemoteCoordinator::connect(addr).await?));
            let services = server.advertise(&registry, &endpoint).await?;
            tracing::info!(%endpoint, registry = %addr, "Advertised {:?}", services);
            Some(registry)
        }
        None => None,
    };

    server.run_until(shutdown_signal()).await?;

    if let Some(registry) = registry {
        registry.close().await?;
    }
    Ok(())
}

async fn run_call(args: CallArgs) -> Result<()> {
    let params = parse_params(&args.params)?;
    let config = ClientConfig::default().with_request_timeout(Duration::from_millis(args.timeout_ms));

    let result = match (&args.endpoint, &args.registry) {
        (Some(endpoint), None) => {
            let mut client = RpcClient::connect(endpoint, &config).await?;
            client.call(&args.service, &args.method, params).await?
        }
        (None, Some(addr)) => {
            let balancer = LoadBalancer::from_policy(&args.policy)?;
            let registry = Arc::new(ServiceRegistry::new(Arc::new(RemoteCoordinator::connect(addr).await?)));
            let pool = Arc::new(ConnectionPool::new(config, PoolConfig::default()));
            let proxy =
                ServiceProxy::new(args.service.as_str(), Arc::clone(&registry), pool).with_load_balancer(balancer);

            let result = proxy.call(&args.method, params).await;
            registry.close().await?;
            result?
        }
        _ => bail!("Give exactly one of --endpoint or --registry"),
    };

    println!("{}", serde_json::to_string(&result)?);
    Ok(())
}

async fn run_demo_command(args: DemoArgs) -> Result<()> {
    tracing::info!(
        "Starting demo with {} servers, {} calls, policy {}",
        args.servers,
        args.calls,
        args.policy
    );
    let report = run_demo(args.servers, args.calls, args.policy).await?;

    for (a, b, sum) in &report.sums {
        println!("add({}, {}) = {}", a, b, sum);
    }
    println!("policy: {}", report.policy);
    for endpoint in &report.endpoints {
        let served = report.served_by.get(endpoint).copied().unwrap_or(0);
        println!("{:>24}  {} calls", endpoint, served);
    }

    Ok(())
}
