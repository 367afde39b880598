use crate::protocol::error::{MinirpcError, Result};
use crate::protocol::{Request, Response};

/// JSON codec for RPC bodies
///
/// Decoding checks the body shape as well as its syntax: a request needs
/// `service_name`, `method_name` and an array `params`; a response needs an
/// integer `code` and a `result`. Any failure is reported as
/// [`MinirpcError::Serialization`], which the server turns into an error
/// response instead of dropping the connection.
///
/// # Example
///
/// ```
/// use minirpc_common::transport::JsonCodec;
/// use minirpc_common::protocol::Request;
/// use serde_json::json;
///
/// let request = Request::new("CalculatorService", "add", vec![json!(4), json!(5)]);
///
/// let encoded = JsonCodec::encode_request(&request).unwrap();
/// let decoded = JsonCodec::decode_request(&encoded).unwrap();
/// assert_eq!(decoded, request);
/// ```
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a request to UTF-8 JSON bytes
    pub fn encode_request(request: &Request) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(request)?)
    }

    /// Decode a request from UTF-8 JSON bytes
    pub fn decode_request(data: &[u8]) -> Result<Request> {
        serde_json::from_slice(data)
            .map_err(|e| MinirpcError::Serialization(format!("Malformed request body: {}", e)))
    }

    /// Encode a response to UTF-8 JSON bytes
    pub fn encode_response(response: &Response) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(response)?)
    }

    /// Decode a response from UTF-8 JSON bytes
    pub fn decode_response(data: &[u8]) -> Result<Response> {
        serde_json::from_slice(data)
            .map_err(|e| MinirpcError::Serialization(format!("Malformed response body: {}", e)))
    }
}
