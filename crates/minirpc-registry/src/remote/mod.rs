//! Coordination service over TCP.
//!
//! [`CoordinatorServer`] serves a [`MemoryCoordinator`](crate::MemoryCoordinator)
//! namespace to other processes; [`RemoteCoordinator`] is the matching
//! [`Coordinator`](crate::Coordinator) session. Messages are JSON bodies in
//! the same frames the RPC traffic uses, see [`protocol`].

mod client;
pub mod protocol;
mod server;

pub use client::{RemoteCoordinator, DEFAULT_COORDINATION_TIMEOUT};
pub use server::CoordinatorServer;
