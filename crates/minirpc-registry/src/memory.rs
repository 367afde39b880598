use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use minirpc_common::protocol::error::{MinirpcError, Result};
use tokio::sync::oneshot;
use tracing::debug;

use crate::coordinator::{parent_path, validate_path, ChildWatch, Coordinator, CreateMode, WatchEvent};

type SessionId = u64;

#[derive(Debug)]
struct Node {
    mode: CreateMode,
    owner: SessionId,
}

struct Watcher {
    session: SessionId,
    tx: oneshot::Sender<WatchEvent>,
}

/// Shared node tree plus the bookkeeping for sessions and armed watches.
struct Namespace {
    nodes: BTreeMap<String, Node>,
    child_watches: HashMap<String, Vec<Watcher>>,
    live_sessions: HashSet<SessionId>,
    next_session: SessionId,
}

impl Namespace {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            Node {
                mode: CreateMode::Persistent,
                owner: 0,
            },
        );

        Self {
            nodes,
            child_watches: HashMap::new(),
            live_sessions: HashSet::new(),
            next_session: 1,
        }
    }

    fn check_session(&self, session: SessionId) -> Result<()> {
        if self.live_sessions.contains(&session) {
            Ok(())
        } else {
            Err(MinirpcError::SessionClosed)
        }
    }

    fn children(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };

        // Keys sharing a prefix are contiguous in a BTreeMap, and the direct
        // children come out already sorted.
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let rest = &key[prefix.len()..];
                if rest.is_empty() || rest.contains('/') {
                    None
                } else {
                    Some(rest.to_string())
                }
            })
            .collect()
    }

    fn fire(&mut self, path: &str, event: WatchEvent) {
        if let Some(watchers) = self.child_watches.remove(path) {
            for watcher in watchers {
                // The receiver may already be gone
                let _ = watcher.tx.send(event.clone());
            }
        }
    }

    fn create(&mut self, session: SessionId, path: &str, mode: CreateMode) -> Result<()> {
        self.check_session(session)?;
        validate_path(path)?;

        if self.nodes.contains_key(path) {
            return Err(MinirpcError::NodeExists(path.to_string()));
        }

        let parent = parent_path(path).ok_or_else(|| MinirpcError::NodeExists(path.to_string()))?;
        match self.nodes.get(parent) {
            None => return Err(MinirpcError::NoNode(parent.to_string())),
            Some(node) if node.mode == CreateMode::Ephemeral => {
                return Err(MinirpcError::Config(format!(
                    "Ephemeral node '{}' cannot have children",
                    parent
                )));
            }
            Some(_) => {}
        }

        self.nodes.insert(path.to_string(), Node { mode, owner: session });
        debug!("Created {:?} node {}", mode, path);

        let parent = parent.to_string();
        self.fire(&parent, WatchEvent::ChildrenChanged { path: parent.clone() });
        Ok(())
    }

    fn delete(&mut self, session: SessionId, path: &str) -> Result<()> {
        self.check_session(session)?;
        validate_path(path)?;
        self.remove_node(path)
    }

    fn remove_node(&mut self, path: &str) -> Result<()> {
        let parent = match parent_path(path) {
            Some(parent) => parent.to_string(),
            None => return Err(MinirpcError::Config("The root node cannot be deleted".to_string())),
        };

        if !self.nodes.contains_key(path) {
            return Err(MinirpcError::NoNode(path.to_string()));
        }
        if !self.children(path).is_empty() {
            return Err(MinirpcError::NotEmpty(path.to_string()));
        }

        self.nodes.remove(path);
        debug!("Deleted node {}", path);

        self.fire(path, WatchEvent::NodeDeleted { path: path.to_string() });
        self.fire(&parent, WatchEvent::ChildrenChanged { path: parent.clone() });
        Ok(())
    }

    fn exists(&self, session: SessionId, path: &str) -> Result<bool> {
        self.check_session(session)?;
        validate_path(path)?;
        Ok(self.nodes.contains_key(path))
    }

    fn get_children(&self, session: SessionId, path: &str) -> Result<Vec<String>> {
        self.check_session(session)?;
        validate_path(path)?;
        if !self.nodes.contains_key(path) {
            return Err(MinirpcError::NoNode(path.to_string()));
        }
        Ok(self.children(path))
    }

    fn watch_children(&mut self, session: SessionId, path: &str) -> Result<(Vec<String>, ChildWatch)> {
        let children = self.get_children(session, path)?;

        let (tx, rx) = oneshot::channel();
        let watchers = self.child_watches.entry(path.to_string()).or_default();
        // Receivers dropped without firing (stopped watch tasks)
        watchers.retain(|w| !w.tx.is_closed());
        watchers.push(Watcher { session, tx });

        Ok((children, rx))
    }

    fn open_session(&mut self) -> SessionId {
        let id = self.next_session;
        self.next_session += 1;
        self.live_sessions.insert(id);
        id
    }

    fn close_session(&mut self, session: SessionId) {
        if !self.live_sessions.remove(&session) {
            return;
        }

        // Ephemeral nodes never have children, so each one is a leaf.
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.mode == CreateMode::Ephemeral && node.owner == session)
            .map(|(path, _)| path.clone())
            .collect();

        for path in &owned {
            if let Err(e) = self.remove_node(path) {
                debug!("Failed to remove ephemeral node {}: {}", path, e);
            }
        }

        for watchers in self.child_watches.values_mut() {
            let (mine, others): (Vec<Watcher>, Vec<Watcher>) =
                std::mem::take(watchers).into_iter().partition(|w| w.session == session);
            *watchers = others;
            for watcher in mine {
                let _ = watcher.tx.send(WatchEvent::SessionClosed);
            }
        }
        self.child_watches.retain(|_, watchers| !watchers.is_empty());

        debug!("Closed session {} ({} ephemeral nodes removed)", session, owned.len());
    }
}

fn lock(namespace: &Mutex<Namespace>) -> MutexGuard<'_, Namespace> {
    // No operation leaves the tree half-updated, so a poisoned lock is still
    // consistent.
    namespace.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-process coordination service.
///
/// Holds a hierarchical namespace shared by every session opened with
/// [`MemoryCoordinator::connect`]. Cloning the coordinator shares the same
/// namespace, which makes it usable as a single ensemble for a server and any
/// number of clients in one process.
///
/// # Example
///
/// ```
/// use minirpc_registry::{Coordinator, CreateMode, MemoryCoordinator};
///
/// # #[tokio::main]
/// # async fn main() -> minirpc_common::Result<()> {
/// let ensemble = MemoryCoordinator::new();
/// let session = ensemble.connect();
///
/// session.create("/services", CreateMode::Persistent).await?;
/// assert!(session.exists("/services").await?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MemoryCoordinator {
    namespace: Arc<Mutex<Namespace>>,
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self {
            namespace: Arc::new(Mutex::new(Namespace::new())),
        }
    }

    /// Open a new session against this namespace.
    pub fn connect(&self) -> MemorySession {
        let id = lock(&self.namespace).open_session();
        debug!("Opened coordination session {}", id);

        MemorySession {
            id,
            namespace: Arc::clone(&self.namespace),
        }
    }

    /// Number of nodes, not counting the root.
    pub fn node_count(&self) -> usize {
        lock(&self.namespace).nodes.len() - 1
    }

    pub fn session_count(&self) -> usize {
        lock(&self.namespace).live_sessions.len()
    }

    /// Armed child watches across all paths.
    pub fn watch_count(&self) -> usize {
        lock(&self.namespace).child_watches.values().map(Vec::len).sum()
    }
}

impl Default for MemoryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// A session on a [`MemoryCoordinator`].
///
/// Closing or dropping the session removes its ephemeral nodes and wakes its
/// pending watches with [`WatchEvent::SessionClosed`].
pub struct MemorySession {
    id: SessionId,
    namespace: Arc<Mutex<Namespace>>,
}

impl MemorySession {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        !lock(&self.namespace).live_sessions.contains(&self.id)
    }
}

#[async_trait]
impl Coordinator for MemorySession {
    async fn create(&self, path: &str, mode: CreateMode) -> Result<()> {
        lock(&self.namespace).create(self.id, path, mode)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        lock(&self.namespace).delete(self.id, path)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        lock(&self.namespace).exists(self.id, path)
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>> {
        lock(&self.namespace).get_children(self.id, path)
    }

    async fn watch_children(&self, path: &str) -> Result<(Vec<String>, ChildWatch)> {
        lock(&self.namespace).watch_children(self.id, path)
    }

    async fn close(&self) -> Result<()> {
        lock(&self.namespace).close_session(self.id);
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        lock(&self.namespace).close_session(self.id);
    }
}
