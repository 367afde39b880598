use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use minirpc_common::protocol::error::{MinirpcError, Result};
use minirpc_common::protocol::{MsgId, MsgIdGenerator};
use minirpc_common::transport::TcpTransport;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::protocol::{self, CoordMessage, CoordRequest, Outcome, WatchId, EVENT_MSG_ID};
use crate::coordinator::{ChildWatch, Coordinator, CreateMode, WatchEvent};

/// Default bound on one coordination round trip (10 seconds)
pub const DEFAULT_COORDINATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Calls and watches waiting on the connection.
#[derive(Default)]
struct Inbox {
    replies: HashMap<MsgId, oneshot::Sender<Outcome>>,
    watches: HashMap<WatchId, oneshot::Sender<WatchEvent>>,
    closed: bool,
}

impl Inbox {
    /// Fail everything still waiting. Later calls see `closed`.
    fn shut(&mut self) {
        self.closed = true;
        // Dropping a reply sender fails its caller with SessionClosed
        self.replies.clear();
        for (_, tx) in self.watches.drain() {
            let _ = tx.send(WatchEvent::SessionClosed);
        }
    }
}

fn lock(inbox: &Mutex<Inbox>) -> MutexGuard<'_, Inbox> {
    inbox.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Session on a coordination service served by
/// [`CoordinatorServer`](super::CoordinatorServer) in another process.
///
/// The connection carries several calls at once: a reader task matches
/// replies to callers by `msg_id` and routes event frames to the armed
/// watches. When the connection ends, for whatever reason, pending calls
/// fail and every watch fires [`WatchEvent::SessionClosed`]. The server has
/// dropped the session's ephemeral nodes by then.
pub struct RemoteCoordinator {
    addr: String,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    inbox: Arc<Mutex<Inbox>>,
    ids: MsgIdGenerator,
    next_watch: AtomicU64,
    request_timeout: Duration,
    reader: JoinHandle<()>,
}

impl RemoteCoordinator {
    /// Open a session on the coordination service at `addr`.
    pub async fn connect(addr: &str) -> Result<Self> {
        let transport = TcpTransport::new();
        let stream = transport.connect(addr).await?;
        let (reader, writer) = stream.into_split();
        debug!(addr, "Connected to coordination service");

        let inbox = Arc::new(Mutex::new(Inbox::default()));
        let reader = tokio::spawn(read_loop(reader, transport, addr.to_string(), Arc::clone(&inbox)));

        Ok(Self {
            addr: addr.to_string(),
            writer: tokio::sync::Mutex::new(writer),
            inbox,
            ids: MsgIdGenerator::new(),
            next_watch: AtomicU64::new(1),
            request_timeout: DEFAULT_COORDINATION_TIMEOUT,
            reader,
        })
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Whether the connection, and with it the session, has ended.
    pub fn is_closed(&self) -> bool {
        lock(&self.inbox).closed
    }

    /// Send `request` and wait for its outcome. `watch` is registered before
    /// the request leaves so an early event cannot be missed.
    async fn round_trip(
        &self,
        request: &CoordRequest,
        watch: Option<(WatchId, oneshot::Sender<WatchEvent>)>,
    ) -> Result<Outcome> {
        let body = protocol::encode(request)?;
        let msg_id = self.ids.next_id();
        let (tx, rx) = oneshot::channel();
        {
            let mut inbox = lock(&self.inbox);
            if inbox.closed {
                return Err(MinirpcError::SessionClosed);
            }
            inbox.replies.insert(msg_id, tx);
            if let Some((watch_id, watch_tx)) = watch {
                inbox.watches.insert(watch_id, watch_tx);
            }
        }

        let sent = {
            let mut writer = self.writer.lock().await;
            TcpTransport::write_frame(&mut *writer, msg_id, &body).await
        };
        if let Err(e) = sent {
            lock(&self.inbox).replies.remove(&msg_id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(MinirpcError::SessionClosed),
            Err(_) => {
                lock(&self.inbox).replies.remove(&msg_id);
                Err(MinirpcError::Timeout(self.request_timeout.as_millis() as u64))
            }
        }
    }

    async fn call(&self, request: CoordRequest) -> Result<Outcome> {
        match self.round_trip(&request, None).await? {
            Outcome::Failed(err) => Err(err.into_error()),
            outcome => Ok(outcome),
        }
    }
}

fn unexpected(outcome: Outcome) -> MinirpcError {
    MinirpcError::Protocol(format!("Unexpected coordination reply {:?}", outcome))
}

async fn read_loop(mut reader: OwnedReadHalf, transport: TcpTransport, addr: String, inbox: Arc<Mutex<Inbox>>) {
    loop {
        let (header, body) = match transport.read_frame(&mut reader).await {
            Ok(frame) => frame,
            Err(MinirpcError::PeerClosed) => {
                debug!(%addr, "Coordination service closed the connection");
                break;
            }
            Err(e) => {
                warn!(%addr, "Coordination connection failed: {}", e);
                break;
            }
        };

        let message: CoordMessage = match protocol::decode(&body) {
            Ok(message) => message,
            Err(e) => {
                warn!(%addr, "Dropping coordination connection: {}", e);
                break;
            }
        };

        let mut pending = lock(&inbox);
        match message {
            CoordMessage::Reply { outcome } if header.msg_id != EVENT_MSG_ID => {
                match pending.replies.remove(&header.msg_id) {
                    Some(tx) => {
                        let _ = tx.send(outcome);
                    }
                    None => debug!(%addr, msg_id = header.msg_id, "Reply for abandoned call"),
                }
            }
            CoordMessage::Event { watch_id, event } => {
                if let Some(tx) = pending.watches.remove(&watch_id) {
                    let _ = tx.send(event);
                }
            }
            CoordMessage::Reply { .. } => {
                warn!(%addr, "Dropping coordination connection: reply without msg_id");
                break;
            }
        }
    }

    lock(&inbox).shut();
}

#[async_trait]
impl Coordinator for RemoteCoordinator {
    async fn create(&self, path: &str, mode: CreateMode) -> Result<()> {
        let request = CoordRequest::Create {
            path: path.to_string(),
            mode,
        };
        match self.call(request).await? {
            Outcome::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        match self.call(CoordRequest::Delete { path: path.to_string() }).await? {
            Outcome::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        match self.call(CoordRequest::Exists { path: path.to_string() }).await? {
            Outcome::Exists(exists) => Ok(exists),
            other => Err(unexpected(other)),
        }
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>> {
        match self.call(CoordRequest::GetChildren { path: path.to_string() }).await? {
            Outcome::Children(children) => Ok(children),
            other => Err(unexpected(other)),
        }
    }

    async fn watch_children(&self, path: &str) -> Result<(Vec<String>, ChildWatch)> {
        let watch_id = self.next_watch.fetch_add(1, Ordering::Relaxed);
        let (watch_tx, watch_rx) = oneshot::channel();
        let request = CoordRequest::WatchChildren {
            path: path.to_string(),
            watch_id,
        };

        let outcome = self.round_trip(&request, Some((watch_id, watch_tx))).await;
        match outcome {
            Ok(Outcome::Children(children)) => Ok((children, watch_rx)),
            other => {
                lock(&self.inbox).watches.remove(&watch_id);
                match other? {
                    Outcome::Failed(err) => Err(err.into_error()),
                    other => Err(unexpected(other)),
                }
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        match self.call(CoordRequest::Close).await {
            // Lost the race with the connection ending; the session is gone either way
            Ok(_) | Err(MinirpcError::SessionClosed) => {}
            Err(e) => return Err(e),
        }
        lock(&self.inbox).shut();
        Ok(())
    }
}

impl Drop for RemoteCoordinator {
    fn drop(&mut self) {
        // The write half goes with us, which ends the session server-side
        self.reader.abort();
    }
}
