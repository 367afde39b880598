use std::io::ErrorKind;

use minirpc_common::protocol::error::{MinirpcError, Result};
use minirpc_common::protocol::{Endpoint, MsgIdGenerator, Params, Request, Response};
use minirpc_common::transport::TcpTransport;
use serde_json::Value;
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::ClientConfig;

/// One connection to one server.
///
/// Calls go out one at a time (`&mut self`), each with a new `msg_id` that
/// the response must echo. After a connection-fatal error (timeout, framing
/// or transport failure) the client refuses further calls; drop it and
/// connect again.
///
/// # Example
///
/// ```no_run
/// use minirpc_client::{ClientConfig, RpcClient};
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> minirpc_common::Result<()> {
/// let mut client = RpcClient::connect("127.0.0.1:12345", &ClientConfig::default()).await?;
/// let sum = client.call("CalculatorService", "add", vec![json!(4), json!(5)]).await?;
/// assert_eq!(sum, json!(9));
/// # Ok(())
/// # }
/// ```
pub struct RpcClient {
    endpoint: String,
    stream: TcpStream,
    transport: TcpTransport,
    ids: MsgIdGenerator,
    config: ClientConfig,
    usable: bool,
}

impl RpcClient {
    /// Connect to a `host:port` endpoint.
    pub async fn connect(endpoint: &str, config: &ClientConfig) -> Result<Self> {
        let parsed = Endpoint::parse(endpoint)?;

        let transport = TcpTransport::new()
            .with_connect_timeout(config.connect_timeout)
            .with_max_body_len(config.max_body_len);
        let stream = transport.connect(&parsed.to_string()).await?;
        debug!(endpoint, "Connected");

        Ok(Self {
            endpoint: endpoint.to_string(),
            stream,
            transport,
            ids: MsgIdGenerator::new(),
            config: config.clone(),
            usable: true,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Whether the connection can carry another call.
    pub fn is_usable(&self) -> bool {
        self.usable
    }

    /// Check an idle connection before reusing it.
    ///
    /// Between calls the server never writes, so a readable socket means the
    /// peer hung up (or sent stray bytes that would desynchronize framing).
    /// Either way the client becomes unusable. Does not block.
    pub fn check_idle(&mut self) -> bool {
        if !self.usable {
            return false;
        }

        let mut buf = [0u8; 1];
        match self.stream.try_read(&mut buf) {
            Err(e) if e.kind() == ErrorKind::WouldBlock => true,
            Ok(0) => {
                debug!(endpoint = %self.endpoint, "Peer closed idle connection");
                self.usable = false;
                false
            }
            Ok(_) => {
                debug!(endpoint = %self.endpoint, "Unexpected bytes on idle connection");
                self.usable = false;
                false
            }
            Err(e) => {
                debug!(endpoint = %self.endpoint, "Idle connection failed: {}", e);
                self.usable = false;
                false
            }
        }
    }

    /// Send `request` and return the raw response, whatever its code.
    pub async fn send(&mut self, request: &Request) -> Result<Response> {
        if !self.usable {
            return Err(MinirpcError::Connection(format!(
                "Connection to {} is no longer usable",
                self.endpoint
            )));
        }

        let msg_id = self.ids.next_id();
        let timeout = self.config.request_timeout;
        debug!(
            endpoint = %self.endpoint,
            msg_id,
            service = %request.service_name,
            method = %request.method_name,
            "Sending request"
        );

        let result = match tokio::time::timeout(
            timeout,
            self.transport.send_request(&mut self.stream, msg_id, request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(MinirpcError::Timeout(timeout.as_millis() as u64)),
        };

        if let Err(e) = &result {
            if e.is_connection_fatal() {
                debug!(endpoint = %self.endpoint, "Discarding connection: {}", e);
                self.usable = false;
            }
        }
        result
    }

    /// Call `service_name.method_name(params)` and return its result value.
    ///
    /// A nonzero response code is returned as [`MinirpcError::Remote`].
    pub async fn call(&mut self, service_name: &str, method_name: &str, params: Params) -> Result<Value> {
        let request = Request::new(service_name, method_name, params);
        into_result(self.send(&request).await?)
    }
}

/// Turn a response into its result value, or `Remote` for a nonzero code.
pub fn into_result(response: Response) -> Result<Value> {
    if response.is_success() {
        Ok(response.result)
    } else {
        Err(MinirpcError::Remote {
            code: response.code,
            message: response.error_message(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minirpc_common::protocol::codes;
    use minirpc_server::{Router, RpcServer, ServerConfig};
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn start_server() -> String {
        let mut router = Router::new();
        router.register_typed("CalculatorService", "add", |(a, b): (i64, i64)| Ok(a + b));

        let server = RpcServer::bind("127.0.0.1:0", router, ServerConfig::default())
            .await
            .unwrap();
        let endpoint = server.advertised_endpoint().unwrap();
        tokio::spawn(server.run());
        endpoint
    }

    #[test]
    fn test_into_result() {
        assert_eq!(into_result(Response::success(json!(9))).unwrap(), json!(9));

        let err = into_result(Response::error(codes::NOT_FOUND, "Service not found")).unwrap_err();
        match err {
            MinirpcError::Remote { code, message } => {
                assert_eq!(code, 404);
                assert_eq!(message, "Service not found");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_call_add() {
        let endpoint = start_server().await;
        let mut client = RpcClient::connect(&endpoint, &ClientConfig::default()).await.unwrap();

        assert_eq!(client.endpoint(), endpoint);
        let sum = client.call("CalculatorService", "add", vec![json!(4), json!(5)]).await.unwrap();
        assert_eq!(sum, json!(9));

        // Connection is reused for the next call
        let sum = client.call("CalculatorService", "add", vec![json!(1), json!(1)]).await.unwrap();
        assert_eq!(sum, json!(2));
    }

    #[tokio::test]
    async fn test_remote_error_keeps_connection() {
        let endpoint = start_server().await;
        let mut client = RpcClient::connect(&endpoint, &ClientConfig::default()).await.unwrap();

        let err = client.call("CalculatorService", "nope", vec![]).await.unwrap_err();
        assert!(matches!(err, MinirpcError::Remote { code: 404, .. }));
        assert!(client.is_usable());

        let sum = client.call("CalculatorService", "add", vec![json!(2), json!(3)]).await.unwrap();
        assert_eq!(sum, json!(5));
    }

    #[tokio::test]
    async fn test_request_timeout_discards_connection() {
        // Accepts and reads but never answers
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            while let Ok(n) = stream.read(&mut buf).await {
                if n == 0 {
                    break;
                }
            }
        });

        let config = ClientConfig::default().with_request_timeout(Duration::from_millis(50));
        let mut client = RpcClient::connect(&endpoint, &config).await.unwrap();

        let err = client.call("CalculatorService", "add", vec![json!(1), json!(1)]).await.unwrap_err();
        assert!(matches!(err, MinirpcError::Timeout(50)));
        assert!(!client.is_usable());

        let err = client.call("CalculatorService", "add", vec![json!(1), json!(1)]).await.unwrap_err();
        assert!(matches!(err, MinirpcError::Connection(_)));
    }

    #[tokio::test]
    async fn test_check_idle_detects_server_close() {
        let mut router = Router::new();
        router.register_typed("CalculatorService", "add", |(a, b): (i64, i64)| Ok(a + b));
        let config = ServerConfig::default().with_idle_timeout(Duration::from_millis(50));
        let server = RpcServer::bind("127.0.0.1:0", router, config).await.unwrap();
        let endpoint = server.advertised_endpoint().unwrap();
        tokio::spawn(server.run());

        let mut client = RpcClient::connect(&endpoint, &ClientConfig::default()).await.unwrap();
        client.call("CalculatorService", "add", vec![json!(4), json!(5)]).await.unwrap();
        assert!(client.check_idle());

        // Server drops the connection once its idle timeout passes
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!client.check_idle());
        assert!(!client.is_usable());
    }

    #[tokio::test]
    async fn test_malformed_endpoint() {
        let err = RpcClient::connect("localhost", &ClientConfig::default()).await.err().unwrap();
        assert!(matches!(err, MinirpcError::Config(_)));

        let err = RpcClient::connect("localhost:http", &ClientConfig::default()).await.err().unwrap();
        assert!(matches!(err, MinirpcError::Config(_)));
    }

    #[tokio::test]
    async fn test_peer_close_discards_connection() {
        // Accepts, drains the request and hangs up without answering
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let _ = stream.read(&mut buf).await;
        });

        let mut client = RpcClient::connect(&endpoint, &ClientConfig::default()).await.unwrap();
        let err = client.call("CalculatorService", "add", vec![json!(1), json!(2)]).await.unwrap_err();

        assert!(err.is_connection_fatal());
        assert!(!client.is_usable());
    }
}
