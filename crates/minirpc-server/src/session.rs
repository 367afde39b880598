use std::sync::Arc;
use std::time::Duration;

use minirpc_common::protocol::error::{MinirpcError, Result};
use minirpc_common::protocol::{codes, Header, Response, HEADER_SIZE};
use minirpc_common::transport::{JsonCodec, TcpTransport};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::router::Router;

/// Body buffers larger than this are shrunk when a session is recycled
const RETAINED_BODY_CAPACITY: usize = 64 * 1024;

/// Where a [`Session`] is in its read-dispatch-write cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the next 12-byte header.
    AwaitHeader,
    /// Header accepted; waiting for exactly `body_len` bytes.
    AwaitBody(Header),
    /// Body read; decoding, routing and writing the response.
    Dispatching(Header),
    /// Connection finished or failed. Terminal.
    Closed,
}

/// Server side of one connection.
///
/// Requests are handled strictly one at a time: the next header is read only
/// after the previous response has been written. Framing and transport
/// failures move the session to [`SessionState::Closed`]; a body that cannot
/// be decoded is answered with a `400` response and the session carries on.
///
/// The header and body buffers belong to the session and survive
/// [`detach`](Session::detach), so a pooled session reuses them for the next
/// connection.
pub struct Session<S = TcpStream> {
    stream: Option<S>,
    router: Option<Arc<Router>>,
    peer: String,
    state: SessionState,
    header_buf: [u8; HEADER_SIZE],
    body_buf: Vec<u8>,
    max_body_len: usize,
    idle_timeout: Option<Duration>,
    requests_served: u64,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Create a session with no connection attached.
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            stream: None,
            router: None,
            peer: String::new(),
            state: SessionState::Closed,
            header_buf: [0u8; HEADER_SIZE],
            body_buf: Vec::new(),
            max_body_len: config.max_body_len,
            idle_timeout: config.idle_timeout,
            requests_served: 0,
        }
    }

    /// Bind the session to a new connection and start in
    /// [`SessionState::AwaitHeader`].
    pub fn attach(&mut self, stream: S, peer: impl Into<String>, router: Arc<Router>) {
        self.stream = Some(stream);
        self.router = Some(router);
        self.peer = peer.into();
        self.state = SessionState::AwaitHeader;
        self.body_buf.clear();
        self.requests_served = 0;
    }

    /// Drop the connection and router reference, keeping the buffers.
    pub fn detach(&mut self) {
        self.stream = None;
        self.router = None;
        self.peer.clear();
        self.state = SessionState::Closed;
        self.body_buf.clear();
        self.body_buf.shrink_to(RETAINED_BODY_CAPACITY);
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn requests_served(&self) -> u64 {
        self.requests_served
    }

    pub fn body_capacity(&self) -> usize {
        self.body_buf.capacity()
    }

    /// Drive the session until the connection closes.
    pub async fn run(&mut self) {
        while self.state != SessionState::Closed {
            if let Err(e) = self.step().await {
                match e {
                    MinirpcError::PeerClosed => debug!(peer = %self.peer, "Connection closed by peer"),
                    _ => warn!(peer = %self.peer, "Closing connection: {}", e),
                }
                self.state = SessionState::Closed;
            }
        }

        if let Some(stream) = self.stream.as_mut() {
            let _ = stream.shutdown().await;
        }
    }

    /// Perform one state transition.
    pub async fn step(&mut self) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| MinirpcError::Connection("Session has no connection".to_string()))?;

        match self.state {
            SessionState::AwaitHeader => {
                let read = TcpTransport::read_header(stream, &mut self.header_buf);
                let header = match self.idle_timeout {
                    Some(timeout) => tokio::time::timeout(timeout, read)
                        .await
                        .map_err(|_| MinirpcError::Timeout(timeout.as_millis() as u64))??,
                    None => read.await?,
                };
                header.validate(self.max_body_len)?;
                self.state = SessionState::AwaitBody(header);
            }
            SessionState::AwaitBody(header) => {
                TcpTransport::read_body(stream, &header, &mut self.body_buf).await?;
                self.state = SessionState::Dispatching(header);
            }
            SessionState::Dispatching(header) => {
                let response = match self.router.as_deref() {
                    Some(router) => dispatch(router, &self.peer, header, &self.body_buf),
                    None => return Err(MinirpcError::Connection("Session has no router".to_string())),
                };

                let body = JsonCodec::encode_response(&response)?;
                TcpTransport::write_frame(stream, header.msg_id, &body).await?;

                self.requests_served += 1;
                self.state = SessionState::AwaitHeader;
            }
            SessionState::Closed => {}
        }

        Ok(())
    }
}

fn dispatch(router: &Router, peer: &str, header: Header, body: &[u8]) -> Response {
    match JsonCodec::decode_request(body) {
        Ok(request) => {
            debug!(
                peer,
                msg_id = header.msg_id,
                service = %request.service_name,
                method = %request.method_name,
                "Dispatching request"
            );
            router.dispatch_request(request)
        }
        Err(e) => {
            warn!(peer, msg_id = header.msg_id, "Rejecting request: {}", e);
            Response::error(codes::BAD_REQUEST, e.to_string())
        }
    }
}
