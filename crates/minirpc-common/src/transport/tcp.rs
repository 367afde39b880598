use std::io::ErrorKind;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tracing::debug;

use crate::protocol::error::{MinirpcError, Result};
use crate::protocol::{Header, MsgId, Request, Response, HEADER_SIZE};
use crate::transport::codec::JsonCodec;

/// Default timeout for establishing a TCP connection (5 seconds)
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default upper bound on a frame body (16 MiB)
pub const DEFAULT_MAX_BODY_LEN: usize = 16 * 1024 * 1024;

/// Async TCP frame transport.
///
/// Frames are a fixed 12-byte [`Header`] followed by exactly `body_len` bytes
/// of JSON:
///
/// ```text
/// [magic u32 BE] [body_len u32 BE] [msg_id u32 BE] [JSON body]
/// ```
///
/// The read/write helpers are generic over tokio's I/O traits so the server
/// session and the client share one framing implementation.
///
/// # Example
///
/// ```no_run
/// use minirpc_common::transport::TcpTransport;
/// use minirpc_common::protocol::Request;
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = TcpTransport::new();
/// let mut stream = transport.connect("127.0.0.1:12345").await?;
///
/// let request = Request::new("CalculatorService", "add", vec![json!(4), json!(5)]);
/// let response = transport.send_request(&mut stream, 1, &request).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TcpTransport {
    connect_timeout: Duration,
    max_body_len: usize,
}

impl TcpTransport {
    /// Creates a transport with default limits.
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_body_len: DEFAULT_MAX_BODY_LEN,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_max_body_len(mut self, max_body_len: usize) -> Self {
        self.max_body_len = max_body_len;
        self
    }

    pub fn max_body_len(&self) -> usize {
        self.max_body_len
    }

    /// Connects to a remote endpoint.
    ///
    /// This method resolves the address (which may resolve to multiple
    /// addresses) and tries each until one succeeds, bounding each attempt by
    /// the connect timeout.
    ///
    /// # Errors
    ///
    /// Returns [`MinirpcError::Connection`] if the address cannot be resolved
    /// or no resolved address accepts the connection, and
    /// [`MinirpcError::Timeout`] if the last attempt timed out.
    pub async fn connect(&self, addr: &str) -> Result<TcpStream> {
        let socket_addrs = lookup_host(addr)
            .await
            .map_err(|e| MinirpcError::Connection(format!("Invalid address '{}': {}", addr, e)))?;

        let mut last_err = None;
        for socket_addr in socket_addrs {
            match tokio::time::timeout(self.connect_timeout, TcpStream::connect(socket_addr)).await {
                Ok(Ok(stream)) => {
                    // Frames are small and request/response; don't wait on Nagle.
                    let _ = stream.set_nodelay(true);
                    return Ok(stream);
                }
                Ok(Err(e)) => {
                    debug!(%socket_addr, "Connect attempt failed: {}", e);
                    last_err = Some(MinirpcError::Connection(format!(
                        "Failed to connect to {}: {}",
                        addr, e
                    )));
                }
                Err(_) => {
                    debug!(%socket_addr, "Connect attempt timed out");
                    last_err = Some(MinirpcError::Timeout(self.connect_timeout.as_millis() as u64));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            MinirpcError::Connection(format!("Failed to connect to {}: no addresses resolved", addr))
        }))
    }

    /// Sends one request frame and waits for its response frame.
    ///
    /// Only one call may be in flight on `stream`. The response must carry the
    /// same `msg_id`; a mismatch is a protocol violation and the connection
    /// should be discarded.
    pub async fn send_request<S>(&self, stream: &mut S, msg_id: MsgId, request: &Request) -> Result<Response>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let encoded = JsonCodec::encode_request(request)?;
        Self::write_frame(stream, msg_id, &encoded).await?;

        let (header, body) = self.read_frame(stream).await?;
        if header.msg_id != msg_id {
            return Err(MinirpcError::Protocol(format!(
                "Response msg_id {} does not match request msg_id {}",
                header.msg_id, msg_id
            )));
        }

        JsonCodec::decode_response(&body)
    }

    /// Writes a complete frame (header then body) and flushes.
    pub async fn write_frame<W>(stream: &mut W, msg_id: MsgId, body: &[u8]) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let header = Header::for_body(body, msg_id)?;

        stream
            .write_all(&header.encode())
            .await
            .map_err(|e| Self::map_io_error(e, "writing header"))?;

        stream
            .write_all(body)
            .await
            .map_err(|e| Self::map_io_error(e, "writing body"))?;

        stream
            .flush()
            .await
            .map_err(|e| Self::map_io_error(e, "flushing stream"))?;

        Ok(())
    }

    /// Reads one complete frame.
    pub async fn read_frame<R>(&self, stream: &mut R) -> Result<(Header, Vec<u8>)>
    where
        R: AsyncRead + Unpin,
    {
        let mut header_buf = [0u8; HEADER_SIZE];
        let header = Self::read_header(stream, &mut header_buf).await?;
        header.validate(self.max_body_len)?;

        let mut body = Vec::new();
        Self::read_body(stream, &header, &mut body).await?;
        Ok((header, body))
    }

    /// Reads exactly [`HEADER_SIZE`] bytes into `buf` and decodes them.
    ///
    /// A peer that closes the connection before sending a header surfaces as
    /// [`MinirpcError::PeerClosed`]; a bad magic as [`MinirpcError::Protocol`].
    pub async fn read_header<R>(stream: &mut R, buf: &mut [u8; HEADER_SIZE]) -> Result<Header>
    where
        R: AsyncRead + Unpin,
    {
        stream.read_exact(buf).await.map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => MinirpcError::PeerClosed,
            _ => Self::map_io_error(e, "reading header"),
        })?;

        Header::decode(buf)
    }

    /// Reads exactly `header.body_len` bytes into `buf`, reusing its capacity.
    pub async fn read_body<R>(stream: &mut R, header: &Header, buf: &mut Vec<u8>) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        buf.clear();
        buf.resize(header.body_len as usize, 0);

        stream
            .read_exact(buf)
            .await
            .map_err(|e| Self::map_io_error(e, "reading body"))?;

        Ok(())
    }

    /// Map IO errors to appropriate MinirpcError variants
    ///
    /// - Resets, timeouts and early EOF -> `Transport`
    /// - Other IO errors -> `Io`
    pub fn map_io_error(err: std::io::Error, context: &str) -> MinirpcError {
        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => {
                MinirpcError::Transport(format!("{}: timed out", context))
            }
            ErrorKind::UnexpectedEof => {
                MinirpcError::Transport(format!("{}: connection closed by peer", context))
            }
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected => {
                MinirpcError::Transport(format!("{}: connection lost", context))
            }
            _ => MinirpcError::Io(err),
        }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}
