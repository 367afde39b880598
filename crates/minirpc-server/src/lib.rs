//! minirpc Server
//!
//! This crate turns a byte stream into dispatched calls:
//!
//! - [`Router`] maps `(service, method)` to a handler and converts every
//!   handler outcome, including panics, into a [`Response`](minirpc_common::Response).
//! - [`Session`] is the per-connection state machine
//!   (`AwaitHeader -> AwaitBody -> Dispatching -> AwaitHeader`, or `Closed`).
//! - [`SessionPool`] recycles sessions and their buffers across connections.
//! - [`RpcServer`] owns the listener and spawns one task per connection.

pub mod config;
pub mod router;
pub mod server;
pub mod session;
pub mod session_pool;

pub use config::ServerConfig;
pub use router::{Handler, Router, DEFAULT_SERVICE};
pub use server::RpcServer;
pub use session::{Session, SessionState};
pub use session_pool::SessionPool;
