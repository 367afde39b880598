use async_trait::async_trait;
use minirpc_common::protocol::error::{MinirpcError, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Lifetime of a node in the coordination namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateMode {
    /// Survives until explicitly deleted.
    Persistent,
    /// Removed automatically when the session that created it ends.
    Ephemeral,
}

/// Notification delivered through a [`ChildWatch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WatchEvent {
    /// A child of the watched node was created or deleted.
    ChildrenChanged { path: String },
    /// The watched node itself was deleted.
    NodeDeleted { path: String },
    /// The session that armed the watch ended.
    SessionClosed,
}

/// One-shot child-change notification.
///
/// Fires at most once; re-arm with [`Coordinator::watch_children`] to keep
/// monitoring.
pub type ChildWatch = oneshot::Receiver<WatchEvent>;

/// Client session to a hierarchical coordination service.
///
/// Every method resolves only once the coordination service has produced its
/// result, so callers never observe state that a pending callback is still
/// about to fill in.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Create a node. The parent must exist.
    ///
    /// Fails with `NodeExists` if the node is already present and `NoNode` if
    /// the parent is missing.
    async fn create(&self, path: &str, mode: CreateMode) -> Result<()>;

    /// Delete a leaf node. Fails with `NoNode` or `NotEmpty`.
    async fn delete(&self, path: &str) -> Result<()>;

    async fn exists(&self, path: &str) -> Result<bool>;

    /// List child names (last path component only), sorted.
    async fn get_children(&self, path: &str) -> Result<Vec<String>>;

    /// List child names and arm a one-shot child watch in the same step.
    async fn watch_children(&self, path: &str) -> Result<(Vec<String>, ChildWatch)>;

    /// End the session, removing its ephemeral nodes.
    async fn close(&self) -> Result<()>;
}

/// Check that `path` is absolute, has no empty components and no trailing
/// slash (except for the root itself).
pub fn validate_path(path: &str) -> Result<()> {
    if path == "/" {
        return Ok(());
    }
    if !path.starts_with('/') || path.ends_with('/') || path[1..].split('/').any(str::is_empty) {
        return Err(MinirpcError::Config(format!("Invalid node path '{}'", path)));
    }
    Ok(())
}

/// Parent of a non-root path.
pub fn parent_path(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Append one component to `parent`.
pub fn join_path(parent: &str, child: &str) -> String {
    if parent == "/" {
        format!("/{}", child)
    } else {
        format!("{}/{}", parent, child)
    }
}
