use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::config::ServerConfig;
use crate::router::Router;
use crate::session::Session;

/// Bounded pool of idle [`Session`]s.
///
/// `acquire` reuses an idle session (and its buffers) when one is available
/// and builds a new one otherwise. `release` keeps the session only while the
/// pool is below capacity, so a burst of connections cannot grow it without
/// bound.
pub struct SessionPool<S = TcpStream> {
    idle: Mutex<Vec<Session<S>>>,
    capacity: usize,
    config: ServerConfig,
}

impl<S> SessionPool<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(config.session_pool_capacity)),
            capacity: config.session_pool_capacity,
            config: config.clone(),
        }
    }

    /// Take a session for `stream`, ready to run.
    pub async fn acquire(&self, stream: S, peer: impl Into<String>, router: Arc<Router>) -> Session<S> {
        let recycled = self.idle.lock().await.pop();
        let mut session = recycled.unwrap_or_else(|| Session::new(&self.config));
        session.attach(stream, peer, router);
        session
    }

    /// Return a finished session. Dropped if the pool is full.
    pub async fn release(&self, mut session: Session<S>) {
        session.detach();

        let mut idle = self.idle.lock().await;
        if idle.len() < self.capacity {
            idle.push(session);
        }
    }

    pub async fn idle_count(&self) -> usize {
        self.idle.lock().await.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
