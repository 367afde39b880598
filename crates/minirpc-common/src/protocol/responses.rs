//! minirpc Response Types
//!
//! This module defines the RPC response body and its status codes.

use serde::{Deserialize, Serialize};

/// RPC method result (JSON value)
///
/// On success this is the handler's return value; on failure it carries a
/// human-readable message.
pub type RpcResult = serde_json::Value;

/// Response status codes.
pub mod codes {
    /// The handler ran and returned a value.
    pub const OK: i64 = 0;
    /// The request body could not be decoded.
    pub const BAD_REQUEST: i64 = 400;
    /// No handler is registered for the (service, method) pair.
    pub const NOT_FOUND: i64 = 404;
    /// The handler failed or panicked.
    pub const HANDLER_FAULT: i64 = 500;
}

/// An RPC response returned from a server to the caller.
///
/// # Response Flow
///
/// 1. Server receives and decodes a `Request`
/// 2. Router produces a `Response` (success or error)
/// 3. Response is serialized to JSON and framed with the request's `msg_id`
/// 4. Client decodes it and turns a nonzero `code` into an error
///
/// # Example
///
/// ```
/// use minirpc_common::protocol::responses::{codes, Response};
/// use serde_json::json;
///
/// let success = Response::success(json!(9));
/// assert_eq!(success.code, codes::OK);
///
/// let error = Response::error(codes::NOT_FOUND, "Service not found");
/// assert_eq!(error.result, json!("Service not found"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    /// 0 on success, otherwise an error class from [`codes`]
    pub code: i64,
    /// Payload on success, message on error
    pub result: RpcResult,
}

impl Response {
    /// Creates a successful response.
    pub fn success(result: RpcResult) -> Self {
        Response {
            code: codes::OK,
            result,
        }
    }

    /// Creates an error response carrying `message` as its result.
    pub fn error(code: i64, message: impl Into<String>) -> Self {
        Response {
            code,
            result: RpcResult::String(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == codes::OK
    }

    /// The error message of a failed response.
    ///
    /// Non-string results are rendered as JSON text.
    pub fn error_message(&self) -> String {
        match &self.result {
            RpcResult::String(message) => message.clone(),
            other => other.to_string(),
        }
    }
}
