//! minirpc Service Registry
//!
//! Maps a logical service name to the set of live `host:port` endpoints.
//! The authoritative copy lives in a coordination service with a
//! hierarchical namespace:
//!
//! ```text
//! /services/<service_name>/<host:port>
//! ```
//!
//! - [`Coordinator`] is the seam to the coordination service (node create,
//!   delete, child listing, one-shot child watches).
//! - [`MemoryCoordinator`] is an in-process coordination service with
//!   sessions and ephemeral nodes.
//! - [`CoordinatorServer`] and [`RemoteCoordinator`] share one namespace
//!   between processes over TCP.
//! - [`ServiceRegistry`] registers, lists and watches service endpoints on top
//!   of any coordinator, caching a read-through snapshot.

pub mod coordinator;
pub mod memory;
pub mod registry;
pub mod remote;

pub use coordinator::{ChildWatch, Coordinator, CreateMode, WatchEvent};
pub use memory::{MemoryCoordinator, MemorySession};
pub use registry::{RegistryConfig, ServiceRegistry};
pub use remote::{CoordinatorServer, RemoteCoordinator};
