//! minirpc Client
//!
//! The client call path resolves a logical service name to one endpoint and
//! performs a single request/response exchange with it:
//!
//! 1. [`ServiceProxy`] asks the [`ServiceRegistry`](minirpc_registry::ServiceRegistry)
//!    for the service's current endpoints
//! 2. a [`LoadBalancer`] picks one
//! 3. the [`ConnectionPool`] hands out an [`RpcClient`] for that endpoint
//! 4. the request goes out with a fresh `msg_id`; a nonzero response code
//!    comes back as [`MinirpcError::Remote`](minirpc_common::MinirpcError::Remote)

pub mod client;
pub mod config;
pub mod load_balancer;
pub mod pool;
pub mod proxy;

pub use client::{into_result, RpcClient};
pub use config::ClientConfig;
pub use load_balancer::{LoadBalancePolicy, LoadBalancer};
pub use pool::{ConnectionPool, PoolConfig};
pub use proxy::ServiceProxy;
