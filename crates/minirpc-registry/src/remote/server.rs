use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use minirpc_common::protocol::error::{MinirpcError, Result};
use minirpc_common::protocol::MsgId;
use minirpc_common::transport::TcpTransport;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::protocol::{self, CoordMessage, CoordRequest, Outcome, WireError, EVENT_MSG_ID};
use crate::coordinator::Coordinator;
use crate::memory::{MemoryCoordinator, MemorySession};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

type Outbox = mpsc::UnboundedSender<(MsgId, Vec<u8>)>;

/// Serves a [`MemoryCoordinator`] namespace over TCP.
///
/// Every connection is one coordination session: ephemeral nodes created
/// through it disappear when the connection ends, and its watches fire as
/// event frames on the same connection.
///
/// # Example
///
/// ```no_run
/// use minirpc_registry::{CoordinatorServer, MemoryCoordinator};
///
/// # #[tokio::main]
/// # async fn main() -> minirpc_common::Result<()> {
/// let server = CoordinatorServer::bind("0.0.0.0:2181", MemoryCoordinator::new()).await?;
/// server.run().await
/// # }
/// ```
pub struct CoordinatorServer {
    listener: TcpListener,
    ensemble: MemoryCoordinator,
    transport: TcpTransport,
}

impl CoordinatorServer {
    pub async fn bind(addr: &str, ensemble: MemoryCoordinator) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| MinirpcError::Connection(format!("Failed to bind to {}: {}", addr, e)))?;

        Ok(Self {
            listener,
            ensemble,
            transport: TcpTransport::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| MinirpcError::Connection(format!("Failed to get local addr: {}", e)))
    }

    /// The namespace being served.
    pub fn ensemble(&self) -> &MemoryCoordinator {
        &self.ensemble
    }

    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serve until `shutdown` completes, then end every open session.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!("Coordination service listening on {}", self.local_addr()?);
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, closing coordination sessions");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let session = self.ensemble.connect();
                        debug!(%peer, session = session.id(), "Coordination session opened");
                        let transport = self.transport.clone();
                        tokio::spawn(serve_connection(stream, peer, session, transport, stop_rx.clone()));
                    }
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        let _ = stop_tx.send(true);
        Ok(())
    }
}

fn post(outbox: &Outbox, msg_id: MsgId, message: &CoordMessage) {
    match protocol::encode(message) {
        Ok(body) => {
            // The writer is gone once the connection is
            let _ = outbox.send((msg_id, body));
        }
        Err(e) => warn!("Failed to encode coordination message: {}", e),
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    session: MemorySession,
    transport: TcpTransport,
    mut stop: watch::Receiver<bool>,
) {
    let _ = stream.set_nodelay(true);
    let (mut reader, mut writer) = stream.into_split();
    let (outbox, mut queued) = mpsc::unbounded_channel::<(MsgId, Vec<u8>)>();

    // Replies and watch events share the socket through one writer
    let writer_task = tokio::spawn(async move {
        while let Some((msg_id, body)) = queued.recv().await {
            if let Err(e) = TcpTransport::write_frame(&mut writer, msg_id, &body).await {
                debug!(%peer, "Failed to write coordination frame: {}", e);
                break;
            }
        }
    });

    loop {
        let frame = tokio::select! {
            _ = stop.changed() => break,
            frame = transport.read_frame(&mut reader) => frame,
        };

        let (header, body) = match frame {
            Ok(frame) => frame,
            Err(MinirpcError::PeerClosed) => {
                debug!(%peer, "Coordination client disconnected");
                break;
            }
            Err(e) => {
                warn!(%peer, "Dropping coordination connection: {}", e);
                break;
            }
        };

        let request: CoordRequest = match protocol::decode(&body) {
            Ok(request) => request,
            Err(e) => {
                let outcome = Outcome::Failed(WireError::from_error(&e));
                post(&outbox, header.msg_id, &CoordMessage::Reply { outcome });
                continue;
            }
        };

        let closing = request == CoordRequest::Close;
        let outcome = handle(&session, request, &outbox).await;
        post(&outbox, header.msg_id, &CoordMessage::Reply { outcome });
        if closing {
            break;
        }
    }

    // Wakes this session's watches, which lets their forwarders finish
    let _ = session.close().await;
    debug!(%peer, session = session.id(), "Coordination session closed");
    drop(outbox);
    let _ = writer_task.await;
}

async fn handle(session: &MemorySession, request: CoordRequest, outbox: &Outbox) -> Outcome {
    match request {
        CoordRequest::Create { path, mode } => Outcome::from_result(session.create(&path, mode).await, |_| Outcome::Done),
        CoordRequest::Delete { path } => Outcome::from_result(session.delete(&path).await, |_| Outcome::Done),
        CoordRequest::Exists { path } => Outcome::from_result(session.exists(&path).await, Outcome::Exists),
        CoordRequest::GetChildren { path } => Outcome::from_result(session.get_children(&path).await, Outcome::Children),
        CoordRequest::WatchChildren { path, watch_id } => {
            Outcome::from_result(session.watch_children(&path).await, |(children, watch)| {
                let outbox = outbox.clone();
                tokio::spawn(async move {
                    if let Ok(event) = watch.await {
                        post(&outbox, EVENT_MSG_ID, &CoordMessage::Event { watch_id, event });
                    }
                });
                Outcome::Children(children)
            })
        }
        CoordRequest::Close => Outcome::Done,
    }
}
